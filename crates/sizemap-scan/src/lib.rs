//! Traversal engine for sizemap.
//!
//! This crate turns a root directory into a flat set of
//! [`AnalyticsRecord`]s, one per visited path, with directory totals
//! aggregated bottom-up.
//!
//! # Overview
//!
//! - **Metadata provider**: one narrow trait over the platform's stat calls
//! - **Cycle guard**: hard links, bind mounts and symlink loops counted once
//! - **Walk**: recursive fan-out traversal on a bounded rayon pool
//! - **Bulk reader**: flat volume table (the NTFS MFT on Windows) aggregated
//!   to the same records, tried first when available
//! - **Progress**: per-entry events over a broadcast channel
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use sizemap_scan::{
//!     PlatformMetadata, Populate, PopulateContext, ProgressSink, ScanConfig, WalkStrategy,
//!     build_pool,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ScanConfig::new("/path/to/scan");
//! let walk = WalkStrategy::new(Arc::new(PlatformMetadata::new()), Arc::new(build_pool(0)?));
//! let sink = ProgressSink::default();
//! let cancel = CancellationToken::new();
//!
//! let root = Path::new("/path/to/scan").canonicalize()?;
//! let populated = walk.populate(&root, PopulateContext { config: &config, sink: &sink, cancel: &cancel })?;
//! println!("{} records", populated.records.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bulk;
mod guard;
mod map;
mod metadata;
#[cfg(windows)]
mod mft;
mod owner;
mod progress;
mod space;
mod strategy;
mod walker;

pub use bulk::{BulkReader, FlatEntry, TableRead, VolumeTable, platform_bulk_reader};
pub use guard::CycleGuard;
pub use map::AnalyticsMap;
pub use metadata::{EntryMetadata, MetadataProvider, PathIdentity, PlatformMetadata};
#[cfg(windows)]
pub use mft::{NtfsTable, is_elevated};
pub use owner::OwnerCache;
pub use progress::{ProgressSink, ScanEvent};
pub use space::{free_space, space_info};
pub use strategy::{Populate, PopulateContext, PopulateError, Populated, populate_with_fallback};
pub use walker::{WORKER_STACK_SIZE, WalkStrategy, build_pool};

// Re-export core types for convenience
pub use sizemap_core::{
    AnalyticsRecord, EntryKind, MetadataError, ScanConfig, ScanError, ScanStrategy, ScanWarning,
    SpaceInfo, Totals, WarningKind,
};
