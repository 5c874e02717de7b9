//! The serving layer: scans, cache publication and lazy expansion.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;
use sizemap_core::{
    AnalyticsRecord, CacheMiss, ScanConfig, ScanError, ScanResult, SpaceInfo, TreeNode,
};
use sizemap_scan::{
    MetadataProvider, PlatformMetadata, Populate, PopulateContext, PopulateError, Populated,
    ProgressSink, ScanEvent, WalkStrategy, build_pool, platform_bulk_reader,
    populate_with_fallback,
};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builder::build_initial_tree;
use crate::cache::{CacheStore, ScanCache};

/// Scans directories and answers expand requests from the last scan.
pub struct DiskAnalyzer {
    config: ScanConfig,
    store: Arc<CacheStore>,
    provider: Arc<dyn MetadataProvider>,
    pool: Arc<ThreadPool>,
    sink: ProgressSink,
    scan_gate: Mutex<()>,
}

impl DiskAnalyzer {
    /// Create an analyzer with the platform metadata provider and its own
    /// cache store. `config.root` is ignored; each scan names its root.
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        Self::with_provider(config, Arc::new(PlatformMetadata::new()))
    }

    /// Create an analyzer with a custom metadata provider.
    pub fn with_provider(
        config: ScanConfig,
        provider: Arc<dyn MetadataProvider>,
    ) -> Result<Self, ScanError> {
        Self::with_store(config, Arc::new(CacheStore::new()), provider)
    }

    /// Create an analyzer around an existing cache store.
    pub fn with_store(
        config: ScanConfig,
        store: Arc<CacheStore>,
        provider: Arc<dyn MetadataProvider>,
    ) -> Result<Self, ScanError> {
        let pool = Arc::new(build_pool(config.threads)?);
        let sink = ProgressSink::new(config.progress_capacity);
        Ok(Self {
            config,
            store,
            provider,
            pool,
            sink,
            scan_gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Subscribe to per-entry scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sink.subscribe()
    }

    /// Scan `root`, publish the records as the live cache and return the
    /// initial tree.
    ///
    /// The previous cache is dropped as soon as the scan starts. On timeout
    /// the walk is cancelled, partial records are discarded and no cache is
    /// left behind. If the cache is cleared while the scan runs, the result is
    /// still returned but not published.
    pub async fn scan(&self, root: impl AsRef<Path>) -> Result<ScanResult, ScanError> {
        let _gate = self.scan_gate.lock().await;
        let started = Instant::now();
        let generation = self.store.clear();

        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| ScanError::io(root, e))?;
        if !root.is_dir() {
            return Err(ScanError::invalid_path(root, "not a directory"));
        }

        let config = self.config.with_root(&root);
        info!(root = %root.display(), timeout = ?config.timeout, "scan started");

        let cancel = CancellationToken::new();
        // An abandoned scan future stops the walk too.
        let _cancel_on_drop = cancel.clone().drop_guard();

        let task = {
            let provider = self.provider.clone();
            let pool = self.pool.clone();
            let sink = self.sink.clone();
            let config = config.clone();
            let root = root.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let populated = populate_blocking(provider, pool, &config, &root, &sink, &cancel)?;
                let tree = build_initial_tree(&populated.records, &root, config.initial_depth)
                    .ok_or_else(|| ScanError::internal("scan produced no record for its root"))?;
                Ok::<_, PopulateError>((populated, tree))
            })
        };

        let (populated, tree) = match tokio::time::timeout(config.timeout, task).await {
            Ok(Ok(Ok(built))) => built,
            Ok(Ok(Err(err))) => return Err(populate_failure(err, &config)),
            Ok(Err(join)) => return Err(ScanError::internal(format!("scan task failed: {join}"))),
            Err(_) => {
                cancel.cancel();
                warn!(root = %root.display(), "scan timed out, discarding partial results");
                return Err(ScanError::Timeout {
                    after: config.timeout,
                });
            }
        };

        match self
            .store
            .publish(ScanCache::new(&root, populated.records), generation)
        {
            Some(cache) => self.spawn_index_build(cache),
            None => info!(root = %root.display(), "cache cleared during scan, result not cached"),
        }

        let result = ScanResult::new(
            root,
            tree,
            started.elapsed(),
            populated.strategy,
            populated.warnings,
        );
        info!(
            root = %result.root_path.display(),
            size = result.total_size(),
            warnings = result.warnings.len(),
            elapsed = ?result.scan_duration,
            "scan finished"
        );
        Ok(result)
    }

    /// Build the lookup index in the background; expand requests fall back
    /// to a linear scan until it is ready.
    fn spawn_index_build(&self, cache: Arc<ScanCache>) {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            pool.install(|| {
                cache.build_index();
            })
        });
    }

    /// Direct children of a scanned directory, one extra level materialized.
    pub fn get_children(&self, path: impl AsRef<Path>) -> Result<Vec<TreeNode>, CacheMiss> {
        let path = path.as_ref();
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        self.store
            .live()
            .and_then(|cache| cache.children(&resolved))
            .inspect_err(|miss| debug!(path = %path.display(), %miss, "cache miss"))
    }

    /// Drop the live cache and keep any running scan from publishing.
    /// Idempotent.
    pub fn clear_cache(&self) {
        self.store.clear();
    }

    /// Flat record set of the live cache.
    pub fn records(&self) -> Result<Vec<AnalyticsRecord>, CacheMiss> {
        self.store.live().map(|cache| cache.records().to_vec())
    }

    /// Bytes available on the volume holding `path`.
    pub fn get_free_space(&self, path: impl AsRef<Path>) -> Result<u64, ScanError> {
        sizemap_scan::free_space(path.as_ref())
    }

    /// Total, used and available bytes of the volume holding `path`.
    pub fn get_space_info(&self, path: impl AsRef<Path>) -> Result<SpaceInfo, ScanError> {
        sizemap_scan::space_info(path.as_ref())
    }
}

fn populate_blocking(
    provider: Arc<dyn MetadataProvider>,
    pool: Arc<ThreadPool>,
    config: &ScanConfig,
    root: &Path,
    sink: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<Populated, PopulateError> {
    let walk = WalkStrategy::new(provider.clone(), pool.clone());
    let bulk = if config.fast_path {
        platform_bulk_reader(provider)
    } else {
        None
    };

    let mut chain: Vec<&dyn Populate> = Vec::with_capacity(2);
    if let Some(bulk) = bulk.as_deref() {
        chain.push(bulk);
    }
    chain.push(&walk);

    let ctx = PopulateContext {
        config,
        sink,
        cancel,
    };
    pool.install(|| populate_with_fallback(&chain, root, ctx))
}

fn populate_failure(err: PopulateError, config: &ScanConfig) -> ScanError {
    match err {
        PopulateError::Scan(err) => err,
        PopulateError::Cancelled => ScanError::Timeout {
            after: config.timeout,
        },
        PopulateError::Unavailable { reason } => ScanError::internal(reason),
    }
}
