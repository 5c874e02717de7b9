//! Scan progress reporting.

use std::path::PathBuf;
use std::time::Duration;

use sizemap_core::{AnalyticsRecord, ScanStrategy, ScanWarning};
use tokio::sync::broadcast;

/// Event published while a scan runs.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A populate strategy started on a root.
    Started {
        root: PathBuf,
        strategy: ScanStrategy,
    },
    /// A non-directory entry was recorded.
    Leaf(AnalyticsRecord),
    /// A directory finished aggregating.
    Directory(AnalyticsRecord),
    /// A recoverable problem was recorded.
    Warning(ScanWarning),
    /// The populate phase finished.
    Finished {
        records: usize,
        elapsed: Duration,
    },
}

impl ScanEvent {
    /// Record carried by this event, if any.
    pub fn record(&self) -> Option<&AnalyticsRecord> {
        match self {
            Self::Leaf(record) | Self::Directory(record) => Some(record),
            _ => None,
        }
    }
}

/// Broadcast sender that skips building events nobody listens to.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: broadcast::Sender<ScanEvent>,
}

impl ProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events. Slow receivers lag rather than block the scan.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Publish an event built lazily.
    pub fn emit(&self, event: impl FnOnce() -> ScanEvent) {
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(event());
        }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new(1024)
    }
}
