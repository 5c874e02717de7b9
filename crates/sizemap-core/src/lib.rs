//! Core types for sizemap.
//!
//! This crate provides the data structures shared by the scanning engine and
//! the scan cache: flat per-path analytics records, the lazily expandable
//! tree node, scan configuration and the error taxonomy.

mod config;
mod error;
mod record;
mod space;
mod tree;

pub use config::{ScanConfig, ScanConfigBuilder};
pub use error::{CacheMiss, MetadataError, ScanError, ScanWarning, WarningKind};
pub use record::{AnalyticsRecord, EntryKind, Totals, display_name};
pub use space::SpaceInfo;
pub use tree::{ScanResult, ScanStrategy, TreeNode, percent_of};
