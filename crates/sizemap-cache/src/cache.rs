//! The live scan cache and its owning store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use sizemap_core::{AnalyticsRecord, CacheMiss, TreeNode};
use tracing::debug;

use crate::builder::{Indexed, Linear, materialize};
use crate::index::ScanIndex;

/// Records of one completed scan plus their lazily built index.
#[derive(Debug)]
pub struct ScanCache {
    root: PathBuf,
    records: Vec<AnalyticsRecord>,
    index: OnceLock<ScanIndex>,
}

impl ScanCache {
    /// Wrap the records of a completed scan of `root`.
    pub fn new(root: impl Into<PathBuf>, records: Vec<AnalyticsRecord>) -> Self {
        Self {
            root: root.into(),
            records,
            index: OnceLock::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records(&self) -> &[AnalyticsRecord] {
        &self.records
    }

    /// The index, if it has been built.
    pub fn index(&self) -> Option<&ScanIndex> {
        self.index.get()
    }

    /// Build the index unless it already exists.
    pub fn build_index(&self) -> &ScanIndex {
        self.index.get_or_init(|| {
            let index = ScanIndex::build(&self.records);
            debug!(root = %self.root.display(), paths = index.len(), "scan index built");
            index
        })
    }

    /// Record for `path`, through the index when it is ready.
    pub fn record(&self, path: &Path) -> Option<&AnalyticsRecord> {
        match self.index() {
            Some(index) => index.position(path).map(|i| &self.records[i]),
            None => self.records.iter().find(|r| r.path == path),
        }
    }

    /// Direct children of `path`, each with one further level materialized.
    pub fn children(&self, path: &Path) -> Result<Vec<TreeNode>, CacheMiss> {
        if !path.starts_with(&self.root) {
            return Err(CacheMiss::NotCached {
                path: path.to_path_buf(),
            });
        }
        let record = self.record(path).ok_or_else(|| CacheMiss::NotCached {
            path: path.to_path_buf(),
        })?;

        let node = match self.index() {
            Some(index) => materialize(
                record,
                2,
                &Indexed {
                    records: &self.records,
                    index,
                },
            ),
            None => {
                debug!(path = %path.display(), "index not ready, scanning records");
                materialize(record, 2, &Linear(&self.records))
            }
        };
        Ok(node.children)
    }
}

/// Holds at most one live [`ScanCache`].
///
/// A new cache is fully built before it is published, so readers see either
/// the old cache, no cache, or the new one. Every clear starts a new
/// generation; a cache built for an older generation is never published.
#[derive(Debug, Default)]
pub struct CacheStore {
    slot: RwLock<Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    cache: Option<Arc<ScanCache>>,
    generation: u64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `cache` if nothing was cleared since `generation` began.
    /// Returns the published cache, or `None` when it is stale.
    pub fn publish(&self, cache: ScanCache, generation: u64) -> Option<Arc<ScanCache>> {
        let mut slot = self.slot.write();
        if slot.generation != generation {
            debug!(root = %cache.root.display(), "stale scan cache dropped");
            return None;
        }
        let cache = Arc::new(cache);
        slot.cache = Some(cache.clone());
        debug!(root = %cache.root.display(), records = cache.records.len(), "scan cache published");
        Some(cache)
    }

    /// Drop the live cache and start a new generation, which is returned.
    pub fn clear(&self) -> u64 {
        let mut slot = self.slot.write();
        if slot.cache.take().is_some() {
            debug!("scan cache cleared");
        }
        slot.generation += 1;
        slot.generation
    }

    /// The live cache, if any.
    pub fn current(&self) -> Option<Arc<ScanCache>> {
        self.slot.read().cache.clone()
    }

    /// The live cache, or [`CacheMiss::Empty`].
    pub fn live(&self) -> Result<Arc<ScanCache>, CacheMiss> {
        self.current().ok_or(CacheMiss::Empty)
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().cache.is_none()
    }
}
