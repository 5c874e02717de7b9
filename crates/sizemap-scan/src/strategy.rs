//! Populate strategies and the fallback chain between them.

use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use sizemap_core::{AnalyticsRecord, MetadataError, ScanConfig, ScanError, ScanStrategy, ScanWarning};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::map::AnalyticsMap;
use crate::metadata::{EntryMetadata, MetadataProvider};
use crate::progress::{ProgressSink, ScanEvent};

/// Why a populate strategy did not produce records.
#[derive(Debug, Error)]
pub enum PopulateError {
    /// The strategy cannot run here; the next one should be tried.
    #[error("strategy unavailable: {reason}")]
    Unavailable { reason: String },

    /// The cancellation token fired mid-scan.
    #[error("scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl PopulateError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Inputs shared by every strategy for one scan.
#[derive(Clone, Copy)]
pub struct PopulateContext<'a> {
    pub config: &'a ScanConfig,
    pub sink: &'a ProgressSink,
    pub cancel: &'a CancellationToken,
}

impl PopulateContext<'_> {
    /// Fail with [`PopulateError::Cancelled`] once the token fired.
    pub fn check_cancelled(&self) -> Result<(), PopulateError> {
        if self.cancel.is_cancelled() {
            Err(PopulateError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Complete record set produced by one strategy.
#[derive(Debug)]
pub struct Populated {
    /// Records ordered by path.
    pub records: Vec<AnalyticsRecord>,
    pub warnings: Vec<ScanWarning>,
    pub strategy: ScanStrategy,
}

/// A way of filling the analytics map for a root directory.
pub trait Populate: Send + Sync {
    /// Which strategy this is.
    fn strategy(&self) -> ScanStrategy;

    /// Cheap capability check run before `populate`.
    fn check_available(&self, _root: &Path) -> Result<(), PopulateError> {
        Ok(())
    }

    /// Produce the full record set for `root`, which must be canonical.
    fn populate(&self, root: &Path, ctx: PopulateContext<'_>) -> Result<Populated, PopulateError>;
}

/// Run the first strategy that is available, falling back in order.
pub fn populate_with_fallback(
    strategies: &[&dyn Populate],
    root: &Path,
    ctx: PopulateContext<'_>,
) -> Result<Populated, PopulateError> {
    for strategy in strategies {
        let kind = strategy.strategy();
        if let Err(err) = strategy.check_available(root) {
            debug!(?kind, %err, "populate strategy skipped");
            continue;
        }

        debug!(?kind, root = %root.display(), "populate strategy selected");
        match strategy.populate(root, ctx) {
            Err(PopulateError::Unavailable { reason }) => {
                debug!(?kind, %reason, "populate strategy gave up, falling back");
            }
            other => return other,
        }
    }

    Err(PopulateError::unavailable("no populate strategy could run"))
}

/// Query the scan root, turning failures into fatal scan errors.
pub(crate) fn root_metadata(
    provider: &dyn MetadataProvider,
    root: &Path,
) -> Result<EntryMetadata, ScanError> {
    let metadata = provider.query(root).map_err(|err| match err {
        MetadataError::PermissionDenied { path } => ScanError::PermissionDenied { path },
        MetadataError::Vanished { path } => ScanError::invalid_path(path, "path not found"),
        MetadataError::Io { path, source } => ScanError::Io { path, source },
        other @ MetadataError::Unsupported { .. } => {
            ScanError::invalid_path(other.path().to_path_buf(), other.to_string())
        }
    })?;

    if !metadata.is_dir() {
        return Err(ScanError::invalid_path(root, "not a directory"));
    }
    Ok(metadata)
}

/// Collects records and warnings for one strategy run and mirrors them to
/// the progress stream.
pub(crate) struct Recorder<'a> {
    map: AnalyticsMap,
    warnings: Mutex<Vec<ScanWarning>>,
    sink: &'a ProgressSink,
    started: Instant,
}

impl<'a> Recorder<'a> {
    pub(crate) fn new(root: &Path, strategy: ScanStrategy, sink: &'a ProgressSink) -> Self {
        sink.emit(|| ScanEvent::Started {
            root: root.to_path_buf(),
            strategy,
        });
        Self {
            map: AnalyticsMap::new(),
            warnings: Mutex::new(Vec::new()),
            sink,
            started: Instant::now(),
        }
    }

    pub(crate) fn leaf(&self, record: AnalyticsRecord) {
        self.sink.emit(|| ScanEvent::Leaf(record.clone()));
        self.map.insert(record);
    }

    pub(crate) fn directory(&self, record: AnalyticsRecord) {
        self.sink.emit(|| ScanEvent::Directory(record.clone()));
        self.map.insert(record);
    }

    pub(crate) fn warn(&self, warning: ScanWarning) {
        debug!(path = %warning.path.display(), kind = ?warning.kind, "{}", warning.message);
        self.sink.emit(|| ScanEvent::Warning(warning.clone()));
        self.warnings.lock().push(warning);
    }

    pub(crate) fn finish(self, strategy: ScanStrategy) -> Populated {
        let records = self.map.into_records();
        let elapsed = self.started.elapsed();
        self.sink.emit(|| ScanEvent::Finished {
            records: records.len(),
            elapsed,
        });
        Populated {
            records,
            warnings: self.warnings.into_inner(),
            strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        kind: ScanStrategy,
        available: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(kind: ScanStrategy, available: bool) -> Self {
            Self {
                kind,
                available,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Populate for Fixed {
        fn strategy(&self) -> ScanStrategy {
            self.kind
        }

        fn populate(&self, _root: &Path, _ctx: PopulateContext<'_>) -> Result<Populated, PopulateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.available {
                return Err(PopulateError::unavailable("not here"));
            }
            Ok(Populated {
                records: Vec::new(),
                warnings: Vec::new(),
                strategy: self.kind,
            })
        }
    }

    #[test]
    fn test_falls_back_to_next_strategy() {
        let config = ScanConfig::new("/r");
        let sink = ProgressSink::new(4);
        let cancel = CancellationToken::new();
        let ctx = PopulateContext {
            config: &config,
            sink: &sink,
            cancel: &cancel,
        };

        let bulk = Fixed::new(ScanStrategy::BulkTable, false);
        let walk = Fixed::new(ScanStrategy::Walk, true);
        let populated = populate_with_fallback(&[&bulk, &walk], Path::new("/r"), ctx).unwrap();

        assert_eq!(populated.strategy, ScanStrategy::Walk);
        assert_eq!(bulk.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancellation_is_not_a_fallback() {
        struct Cancelled;
        impl Populate for Cancelled {
            fn strategy(&self) -> ScanStrategy {
                ScanStrategy::BulkTable
            }
            fn populate(&self, _: &Path, _: PopulateContext<'_>) -> Result<Populated, PopulateError> {
                Err(PopulateError::Cancelled)
            }
        }

        let config = ScanConfig::new("/r");
        let sink = ProgressSink::new(4);
        let cancel = CancellationToken::new();
        let ctx = PopulateContext {
            config: &config,
            sink: &sink,
            cancel: &cancel,
        };
        let walk = Fixed::new(ScanStrategy::Walk, true);

        let result = populate_with_fallback(&[&Cancelled, &walk], Path::new("/r"), ctx);
        assert!(matches!(result, Err(PopulateError::Cancelled)));
        assert_eq!(walk.calls.load(Ordering::SeqCst), 0);
    }
}
