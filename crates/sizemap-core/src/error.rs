//! Error types for scanning operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for the scan root.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Root path does not exist or is not a directory.
    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scan exceeded its time budget; partial results were discarded.
    #[error("Scan timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    /// Worker task failed or the engine could not be set up.
    #[error("{message}")]
    Internal { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::InvalidPath {
                path,
                reason: "path not found".to_string(),
            },
            _ => Self::Io { path, source },
        }
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Per-entry metadata failures. Always recoverable.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Entry disappeared between enumeration and query.
    #[error("Vanished during scan: {path}")]
    Vanished { path: PathBuf },

    #[error("Unsupported filesystem feature ({feature}) at {path}")]
    Unsupported { path: PathBuf, feature: &'static str },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetadataError {
    /// Classify an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::Vanished { path },
            std::io::ErrorKind::Unsupported => Self::Unsupported {
                path,
                feature: "metadata",
            },
            _ => Self::Io { path, source },
        }
    }

    /// Path the error occurred at.
    pub fn path(&self) -> &Path {
        match self {
            Self::PermissionDenied { path }
            | Self::Vanished { path }
            | Self::Unsupported { path, .. }
            | Self::Io { path, .. } => path,
        }
    }
}

/// Lookup failure against the scan cache. The caller recovers by rescanning.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheMiss {
    /// No scan cache is live.
    #[error("No scan data available")]
    Empty,

    /// The path is not part of the cached scan.
    #[error("Path not found in scan data: {path}")]
    NotCached { path: PathBuf },
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Error enumerating a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
    /// Entry vanished mid-scan.
    Vanished,
    /// Directory nested deeper than the configured limit.
    DepthLimit,
}

/// Non-fatal warning encountered during scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a read error warning for a directory that could not be listed.
    pub fn read_error(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        let kind = if error.kind() == std::io::ErrorKind::PermissionDenied {
            WarningKind::PermissionDenied
        } else {
            WarningKind::ReadError
        };
        Self {
            message: format!("Read error: {error}"),
            path,
            kind,
        }
    }

    /// Create a warning for a directory beyond the depth limit.
    pub fn depth_limit(path: impl Into<PathBuf>, max_depth: usize) -> Self {
        let path = path.into();
        Self {
            message: format!("Not descending past depth {max_depth}: {}", path.display()),
            path,
            kind: WarningKind::DepthLimit,
        }
    }
}

impl From<&MetadataError> for ScanWarning {
    fn from(error: &MetadataError) -> Self {
        let kind = match error {
            MetadataError::PermissionDenied { .. } => WarningKind::PermissionDenied,
            MetadataError::Vanished { .. } => WarningKind::Vanished,
            _ => WarningKind::MetadataError,
        };
        Self::new(error.path(), error.to_string(), kind)
    }
}
