//! Bulk reader over a volume's flat metadata table.
//!
//! A [`VolumeTable`] hands back every entry under the root in one pass, with
//! no directory structure. The reader regroups entries by parent, replays the
//! walk's admission order through the [`CycleGuard`] and then aggregates
//! bottom-up, so the records match what a sequential walk produces.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sizemap_core::{AnalyticsRecord, EntryKind, ScanStrategy, ScanWarning, Totals};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::guard::CycleGuard;
use crate::metadata::{EntryMetadata, MetadataProvider};
use crate::strategy::{Populate, PopulateContext, PopulateError, Populated, Recorder, root_metadata};
use crate::walker::admission_order;

/// Cancellation is polled once per this many table entries.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// One row of a volume table.
#[derive(Debug, Clone)]
pub struct FlatEntry {
    /// Absolute path.
    pub path: PathBuf,
    pub metadata: EntryMetadata,
}

/// Entries read from a volume table plus soft problems hit while reading.
#[derive(Debug, Default)]
pub struct TableRead {
    pub entries: Vec<FlatEntry>,
    pub warnings: Vec<ScanWarning>,
}

/// A platform source that lists every entry of a volume at once.
pub trait VolumeTable: Send + Sync {
    /// Whether the table can be read for `root`.
    fn check_available(&self, root: &Path) -> Result<(), PopulateError>;

    /// Read every entry strictly below `root`.
    fn read_table(&self, root: &Path, cancel: &CancellationToken) -> Result<TableRead, PopulateError>;
}

/// Populates records from a [`VolumeTable`].
pub struct BulkReader<T> {
    table: T,
    provider: Arc<dyn MetadataProvider>,
}

impl<T: VolumeTable> BulkReader<T> {
    pub fn new(table: T, provider: Arc<dyn MetadataProvider>) -> Self {
        Self { table, provider }
    }
}

impl<T: VolumeTable> Populate for BulkReader<T> {
    fn strategy(&self) -> ScanStrategy {
        ScanStrategy::BulkTable
    }

    fn check_available(&self, root: &Path) -> Result<(), PopulateError> {
        self.table.check_available(root)
    }

    fn populate(&self, root: &Path, ctx: PopulateContext<'_>) -> Result<Populated, PopulateError> {
        let root_meta = root_metadata(self.provider.as_ref(), root)?;
        let read = self.table.read_table(root, ctx.cancel)?;
        info!(root = %root.display(), entries = read.entries.len(), "volume table read");

        let recorder = Recorder::new(root, ScanStrategy::BulkTable, ctx.sink);
        for warning in read.warnings {
            recorder.warn(warning);
        }

        let guard = CycleGuard::new();
        guard.admit(root_meta.identity);
        guard.admit_path(root);

        let admitted = admit_top_down(root, read.entries, &guard, &recorder, ctx)?;
        let root_totals = aggregate_bottom_up(root, admitted, &recorder, ctx)?;

        recorder.directory(AnalyticsRecord::new(
            root,
            EntryKind::Directory,
            root_totals,
            root_meta.mtime,
            root_meta.owner_name,
        ));
        Ok(recorder.finish(ScanStrategy::BulkTable))
    }
}

/// The bulk reader for this platform's native volume table, if it has one.
pub fn platform_bulk_reader(provider: Arc<dyn MetadataProvider>) -> Option<Box<dyn Populate>> {
    #[cfg(windows)]
    {
        let table = crate::mft::NtfsTable::new(provider.clone());
        Some(Box::new(BulkReader::new(table, provider)))
    }
    #[cfg(not(windows))]
    {
        let _ = provider;
        None
    }
}

/// Totals accumulated per directory, plus rejected-alias counts.
type Accumulators = HashMap<PathBuf, Totals>;

/// Group table rows under their parent directory, each group in admission
/// order. Rows outside `root` are dropped.
fn group_by_parent(root: &Path, entries: Vec<FlatEntry>) -> HashMap<PathBuf, Vec<FlatEntry>> {
    let mut groups: HashMap<PathBuf, Vec<FlatEntry>> = HashMap::new();
    for entry in entries {
        if entry.path == root || !entry.path.starts_with(root) {
            continue;
        }
        if let Some(parent) = entry.path.parent() {
            groups.entry(parent.to_path_buf()).or_default().push(entry);
        }
    }
    for children in groups.values_mut() {
        children.sort_by(|a, b| admission_order(&a.path, &a.metadata, &b.path, &b.metadata));
    }
    groups
}

/// Admit entries in the walk's order: every child of a directory meets the
/// guard before the first subdirectory is entered, and subdirectories are
/// entered depth-first in admission order. Rows under rejected,
/// depth-limited or unlisted directories are never reached.
fn admit_top_down(
    root: &Path,
    entries: Vec<FlatEntry>,
    guard: &CycleGuard,
    recorder: &Recorder<'_>,
    ctx: PopulateContext<'_>,
) -> Result<(Vec<FlatEntry>, Accumulators), PopulateError> {
    let total = entries.len();
    let mut groups = group_by_parent(root, entries);

    let max_depth = ctx.config.max_depth;
    let mut accumulators: Accumulators = HashMap::from([(root.to_path_buf(), Totals::default())]);
    let mut admitted = Vec::with_capacity(total);
    let mut pending: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];
    let mut seen = 0usize;

    while let Some((dir, depth)) = pending.pop() {
        let Some(children) = groups.remove(&dir) else {
            continue;
        };

        let child_depth = depth + 1;
        let mut descend = Vec::new();
        let mut rejected = Totals::default();
        for entry in children {
            if seen % CANCEL_CHECK_INTERVAL == 0 {
                ctx.check_cancelled()?;
            }
            seen += 1;

            let meta = &entry.metadata;
            if !guard.admit_entry(&entry.path, meta) {
                rejected += Totals::rejected();
                continue;
            }

            if meta.is_dir() {
                accumulators.insert(entry.path.clone(), meta.own_totals());
                if child_depth < max_depth {
                    descend.push(entry.path.clone());
                } else {
                    recorder.warn(ScanWarning::depth_limit(&entry.path, max_depth));
                }
            }
            admitted.push(entry);
        }

        if let Some(totals) = accumulators.get_mut(&dir) {
            *totals += rejected;
        }
        // Reversed so the first subdirectory is entered first.
        pending.extend(descend.into_iter().rev().map(|path| (path, child_depth)));
    }

    Ok((admitted, accumulators))
}

/// Fold admitted entries into their parents, deepest first, recording each.
fn aggregate_bottom_up(
    root: &Path,
    (admitted, mut accumulators): (Vec<FlatEntry>, Accumulators),
    recorder: &Recorder<'_>,
    ctx: PopulateContext<'_>,
) -> Result<Totals, PopulateError> {
    for (i, entry) in admitted.into_iter().rev().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }

        let FlatEntry { path, metadata } = entry;
        let is_dir = metadata.is_dir();
        let totals = if is_dir {
            accumulators.remove(&path).unwrap_or_else(|| metadata.own_totals())
        } else {
            metadata.own_totals()
        };

        if let Some(parent_totals) = path.parent().and_then(|p| accumulators.get_mut(p)) {
            *parent_totals += totals;
        }

        let record = AnalyticsRecord::new(
            path,
            metadata.kind,
            totals,
            metadata.mtime,
            metadata.owner_name,
        );
        if is_dir {
            recorder.directory(record);
        } else {
            recorder.leaf(record);
        }
    }

    Ok(accumulators.remove(root).unwrap_or_default())
}
