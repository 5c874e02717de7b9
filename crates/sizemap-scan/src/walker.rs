//! Recursive, fan-out directory walker.
//!
//! Each directory is enumerated, its children classified and admitted
//! through the [`CycleGuard`], then subdirectories are recursed and files
//! sized. Children hand their totals back by value; the parent's record is
//! written once every child has reported.
//!
//! All children of a directory meet the guard, in name order, before any of
//! them is descended. Small directories are processed sequentially on the
//! current worker, large ones fan out across the rayon pool. Recursion depth is bounded by
//! `ScanConfig::max_depth`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use sizemap_core::{AnalyticsRecord, EntryKind, ScanError, ScanStrategy, ScanWarning, Totals};
use tracing::{info, trace};

use crate::guard::CycleGuard;
use crate::metadata::{EntryMetadata, MetadataProvider};
use crate::strategy::{Populate, PopulateContext, PopulateError, Populated, Recorder, root_metadata};

/// Stack size for walk workers; recursion depth tracks directory nesting.
pub const WORKER_STACK_SIZE: usize = 32 * 1024 * 1024;

/// Build the bounded worker pool scans run on (0 threads = one per core).
pub fn build_pool(threads: usize) -> Result<ThreadPool, ScanError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .stack_size(WORKER_STACK_SIZE)
        .thread_name(|i| format!("sizemap-walk-{i}"))
        .build()
        .map_err(|e| ScanError::internal(format!("failed to start worker pool: {e}")))
}

/// Directory-by-directory traversal. Always available.
pub struct WalkStrategy {
    provider: Arc<dyn MetadataProvider>,
    pool: Arc<ThreadPool>,
}

impl WalkStrategy {
    pub fn new(provider: Arc<dyn MetadataProvider>, pool: Arc<ThreadPool>) -> Self {
        Self { provider, pool }
    }
}

impl Populate for WalkStrategy {
    fn strategy(&self) -> ScanStrategy {
        ScanStrategy::Walk
    }

    fn populate(&self, root: &Path, ctx: PopulateContext<'_>) -> Result<Populated, PopulateError> {
        let root_meta = root_metadata(self.provider.as_ref(), root)?;
        info!(root = %root.display(), threads = self.pool.current_num_threads(), "walking");

        let walk = TreeWalker {
            provider: self.provider.as_ref(),
            guard: CycleGuard::new(),
            recorder: Recorder::new(root, ScanStrategy::Walk, ctx.sink),
            ctx,
        };

        walk.guard.admit(root_meta.identity);
        walk.guard.admit_path(root);

        let totals = self.pool.install(|| walk.visit_dir(root, 0))?;
        walk.recorder.directory(AnalyticsRecord::new(
            root,
            EntryKind::Directory,
            totals,
            root_meta.mtime,
            root_meta.owner_name,
        ));

        Ok(walk.recorder.finish(ScanStrategy::Walk))
    }
}

/// Order in which siblings meet the cycle guard: non-symlinks by name, then
/// symlinks by name. The bulk reader admits in the same order.
pub(crate) fn admission_order(
    a: &Path,
    a_meta: &EntryMetadata,
    b: &Path,
    b_meta: &EntryMetadata,
) -> std::cmp::Ordering {
    a_meta
        .is_symlink()
        .cmp(&b_meta.is_symlink())
        .then_with(|| a.file_name().cmp(&b.file_name()))
}

/// State of one walk.
struct TreeWalker<'a> {
    provider: &'a dyn MetadataProvider,
    guard: CycleGuard,
    recorder: Recorder<'a>,
    ctx: PopulateContext<'a>,
}

impl TreeWalker<'_> {
    /// Totals of everything below `dir`, which sits at `depth` under the root.
    fn visit_dir(&self, dir: &Path, depth: usize) -> Result<Totals, PopulateError> {
        self.ctx.check_cancelled()?;

        let children = self.classify_children(dir)?;

        let mut totals = Totals::default();
        let mut admitted = Vec::with_capacity(children.len());
        for (path, meta) in children {
            if self.guard.admit_entry(&path, &meta) {
                admitted.push((path, meta));
            } else {
                trace!(path = %path.display(), "alias already counted");
                totals += Totals::rejected();
            }
        }

        let child_depth = depth + 1;
        let from_children = if admitted.len() < self.ctx.config.parallel_threshold {
            admitted
                .into_iter()
                .map(|(path, meta)| self.visit_entry(path, meta, child_depth))
                .sum::<Result<Totals, PopulateError>>()?
        } else {
            admitted
                .into_par_iter()
                .map(|(path, meta)| self.visit_entry(path, meta, child_depth))
                .try_reduce(Totals::default, |a, b| Ok(a + b))?
        };

        Ok(totals + from_children)
    }

    /// Enumerate and query the children of `dir` in admission order.
    fn classify_children(&self, dir: &Path) -> Result<Vec<(PathBuf, EntryMetadata)>, PopulateError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                self.recorder.warn(ScanWarning::read_error(dir, &err));
                return Ok(Vec::new());
            }
        };

        let mut children = Vec::new();
        for entry in entries {
            self.ctx.check_cancelled()?;
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    self.recorder.warn(ScanWarning::read_error(dir, &err));
                    continue;
                }
            };
            match self.provider.query(&path) {
                Ok(meta) => children.push((path, meta)),
                Err(err) => self.recorder.warn(ScanWarning::from(&err)),
            }
        }

        children.sort_by(|(a, a_meta), (b, b_meta)| admission_order(a, a_meta, b, b_meta));
        Ok(children)
    }

    fn visit_entry(
        &self,
        path: PathBuf,
        meta: EntryMetadata,
        depth: usize,
    ) -> Result<Totals, PopulateError> {
        self.ctx.check_cancelled()?;
        let own = meta.own_totals();

        if !meta.is_dir() {
            self.recorder.leaf(AnalyticsRecord::new(
                path,
                meta.kind,
                own,
                meta.mtime,
                meta.owner_name,
            ));
            return Ok(own);
        }

        let totals = if depth < self.ctx.config.max_depth {
            own + self.visit_dir(&path, depth)?
        } else {
            self.recorder
                .warn(ScanWarning::depth_limit(&path, self.ctx.config.max_depth));
            own
        };

        self.recorder.directory(AnalyticsRecord::new(
            path,
            EntryKind::Directory,
            totals,
            meta.mtime,
            meta.owner_name,
        ));
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PlatformMetadata;
    use crate::progress::ProgressSink;
    use sizemap_core::{ScanConfig, WarningKind};
    use std::fs;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn walk(root: &Path, config: &ScanConfig) -> Result<Populated, PopulateError> {
        let strategy = WalkStrategy::new(Arc::new(PlatformMetadata::new()), Arc::new(build_pool(2).unwrap()));
        let sink = ProgressSink::new(16);
        let cancel = CancellationToken::new();
        strategy.populate(
            root,
            PopulateContext {
                config,
                sink: &sink,
                cancel: &cancel,
            },
        )
    }

    fn find<'a>(populated: &'a Populated, path: &Path) -> &'a AnalyticsRecord {
        populated
            .records
            .iter()
            .find(|r| r.path == path)
            .unwrap_or_else(|| panic!("no record for {}", path.display()))
    }

    #[test]
    fn test_walk_empty_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let populated = walk(&root, &ScanConfig::new(&root)).unwrap();

        assert_eq!(populated.records.len(), 1);
        let record = find(&populated, &root);
        assert_eq!(record.size_bytes, 0);
        assert_eq!(record.entry_count, 0);
        assert!(record.is_dir());
    }

    #[test]
    fn test_walk_nested_sums() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("a"), vec![0u8; 10]).unwrap();
        fs::create_dir(root.join("c")).unwrap();
        fs::write(root.join("c/d"), vec![0u8; 5]).unwrap();

        let populated = walk(&root, &ScanConfig::new(&root)).unwrap();
        let top = find(&populated, &root);
        assert_eq!(top.size_bytes, 15);
        assert_eq!(top.file_count, 2);
        assert_eq!(top.directory_count, 1);
        assert_eq!(top.entry_count, 3);

        let sub = find(&populated, &root.join("c"));
        assert_eq!(sub.size_bytes, 5);
        assert_eq!(sub.file_count, 1);
    }

    #[test]
    fn test_wide_directory_fans_out() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        for i in 0..50 {
            fs::write(root.join(format!("f{i}")), vec![0u8; 2]).unwrap();
        }
        let config = ScanConfig::builder()
            .root(&root)
            .parallel_threshold(4usize)
            .build()
            .unwrap();

        let populated = walk(&root, &config).unwrap();
        let top = find(&populated, &root);
        assert_eq!(top.size_bytes, 100);
        assert_eq!(top.file_count, 50);
    }

    #[test]
    fn test_depth_limit_records_warning() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/deep.txt"), "hidden").unwrap();
        let config = ScanConfig::builder()
            .root(&root)
            .max_depth(1usize)
            .build()
            .unwrap();

        let populated = walk(&root, &config).unwrap();
        let a = find(&populated, &root.join("a"));
        assert_eq!(a.size_bytes, 0);
        assert!(
            populated
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::DepthLimit)
        );
        assert!(!populated.records.iter().any(|r| r.path == root.join("a/b")));
    }

    #[test]
    fn test_cancelled_walk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("a"), "x").unwrap();

        let strategy = WalkStrategy::new(Arc::new(PlatformMetadata::new()), Arc::new(build_pool(1).unwrap()));
        let config = ScanConfig::new(&root);
        let sink = ProgressSink::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = strategy.populate(
            &root,
            PopulateContext {
                config: &config,
                sink: &sink,
                cancel: &cancel,
            },
        );
        assert!(matches!(result, Err(PopulateError::Cancelled)));
    }

    #[test]
    fn test_root_must_be_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "x").unwrap();

        let result = walk(&file, &ScanConfig::new(&file));
        assert!(matches!(
            result,
            Err(PopulateError::Scan(ScanError::InvalidPath { .. }))
        ));
    }
}
