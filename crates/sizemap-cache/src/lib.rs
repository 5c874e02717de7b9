//! Scan cache and serving layer for sizemap.
//!
//! A completed scan's records are published as the single live
//! [`ScanCache`]. The initial tree is returned immediately; lookup indices
//! are built in the background and later expand requests are answered from
//! them, or from a linear scan of the records until they exist.
//!
//! # Example
//!
//! ```rust,no_run
//! use sizemap_cache::DiskAnalyzer;
//! use sizemap_core::ScanConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let analyzer = DiskAnalyzer::new(ScanConfig::default())?;
//! let result = analyzer.scan("/path/to/scan").await?;
//!
//! for child in &result.tree.children {
//!     println!("{:>6.2}% {}", child.percent_of_parent, child.name);
//! }
//!
//! let deeper = analyzer.get_children(result.root_path.join("src"))?;
//! println!("{} entries under src", deeper.len());
//! # Ok(())
//! # }
//! ```

mod analyzer;
mod builder;
mod cache;
mod index;

pub use analyzer::DiskAnalyzer;
pub use builder::build_initial_tree;
pub use cache::{CacheStore, ScanCache};
pub use index::ScanIndex;
