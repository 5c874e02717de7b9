//! Scan configuration types.

use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for scanning operations.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Root path to scan.
    pub root: PathBuf,

    /// Number of worker threads (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Directories with fewer admitted children than this are processed
    /// sequentially on the current worker.
    #[builder(default = "20")]
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Maximum directory nesting the walk descends into.
    #[builder(default = "1024")]
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Levels below the root materialized in the initial tree.
    #[builder(default = "1")]
    #[serde(default = "default_initial_depth")]
    pub initial_depth: usize,

    /// Time budget for a whole scan.
    #[builder(default = "Duration::from_secs(300)")]
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Try the bulk metadata-table reader before walking.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub fast_path: bool,

    /// Capacity of the progress event channel.
    #[builder(default = "1024")]
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_parallel_threshold() -> usize {
    20
}

fn default_max_depth() -> usize {
    1024
}

fn default_initial_depth() -> usize {
    1
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_progress_capacity() -> usize {
    1024
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.root {
            Some(ref root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            _ => {}
        }
        if self.parallel_threshold == Some(0) {
            return Err("Parallel threshold must be at least 1".to_string());
        }
        if self.max_depth == Some(0) {
            return Err("Max depth must be at least 1".to_string());
        }
        if self.initial_depth == Some(0) {
            return Err("Initial depth must be at least 1".to_string());
        }
        if self.progress_capacity == Some(0) {
            return Err("Progress capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config for scanning a path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            threads: 0,
            parallel_threshold: default_parallel_threshold(),
            max_depth: default_max_depth(),
            initial_depth: default_initial_depth(),
            timeout: default_timeout(),
            fast_path: true,
            progress_capacity: default_progress_capacity(),
        }
    }

    /// Same settings, different root.
    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..self.clone()
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
