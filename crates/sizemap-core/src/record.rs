//! Flat per-path analytics records.

use std::borrow::Cow;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Type of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (never followed).
    Symlink,
    /// Other file types (sockets, devices, fifos).
    Other,
    /// The synthetic "[N files]" node grouping a directory's files. Never
    /// produced by a scan.
    FileGroup,
}

impl EntryKind {
    /// Check if this is a directory.
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }

    /// Check if this is a regular file.
    pub fn is_file(self) -> bool {
        matches!(self, EntryKind::File)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(self) -> bool {
        matches!(self, EntryKind::Symlink)
    }
}

/// Size and count totals attributed to a subtree.
///
/// Totals are plain values: a directory's totals are the sum of the totals
/// its children hand back, plus the directory's own contribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub size_bytes: u64,
    pub size_allocated_bytes: u64,
    pub entry_count: u64,
    pub file_count: u64,
    pub directory_count: u64,
}

impl Totals {
    /// Contribution of a single non-root entry, excluding any descendants.
    ///
    /// Symlinks count as an entry but never add bytes or a file/directory
    /// count. Directories add no bytes of their own.
    pub fn own(kind: EntryKind, size_bytes: u64, allocated_bytes: u64) -> Self {
        match kind {
            EntryKind::File => Self {
                size_bytes,
                size_allocated_bytes: allocated_bytes,
                entry_count: 1,
                file_count: 1,
                directory_count: 0,
            },
            EntryKind::Directory => Self {
                entry_count: 1,
                directory_count: 1,
                ..Self::default()
            },
            EntryKind::Symlink => Self {
                entry_count: 1,
                ..Self::default()
            },
            EntryKind::Other => Self {
                size_bytes,
                size_allocated_bytes: allocated_bytes,
                entry_count: 1,
                ..Self::default()
            },
            EntryKind::FileGroup => Self::default(),
        }
    }

    /// Contribution of an entry rejected as an alias of something already
    /// counted.
    pub fn rejected() -> Self {
        Self {
            entry_count: 1,
            ..Self::default()
        }
    }
}

impl Add for Totals {
    type Output = Totals;

    fn add(mut self, rhs: Totals) -> Totals {
        self += rhs;
        self
    }
}

impl AddAssign for Totals {
    fn add_assign(&mut self, rhs: Totals) {
        self.size_bytes += rhs.size_bytes;
        self.size_allocated_bytes += rhs.size_allocated_bytes;
        self.entry_count += rhs.entry_count;
        self.file_count += rhs.file_count;
        self.directory_count += rhs.directory_count;
    }
}

impl Sum for Totals {
    fn sum<I: Iterator<Item = Totals>>(iter: I) -> Totals {
        iter.fold(Totals::default(), Add::add)
    }
}

/// Aggregate analytics for one visited filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    /// Absolute path; unique key within a scan.
    pub path: PathBuf,
    /// Entry classification.
    pub kind: EntryKind,
    /// Apparent size in bytes (aggregate for directories).
    pub size_bytes: u64,
    /// Allocated size on disk in bytes (aggregate for directories).
    pub size_allocated_bytes: u64,
    /// Files, directories and symlinks reachable, including this node unless
    /// it is the scan root.
    pub entry_count: u64,
    /// Number of files.
    pub file_count: u64,
    /// Number of directories.
    pub directory_count: u64,
    /// The entry's own modification time (Unix seconds).
    pub last_modified_time: u64,
    /// Owner of the entry, when it could be resolved.
    pub owner_name: Option<String>,
}

impl AnalyticsRecord {
    /// Create a record from aggregated totals.
    pub fn new(
        path: impl Into<PathBuf>,
        kind: EntryKind,
        totals: Totals,
        last_modified_time: u64,
        owner_name: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            size_bytes: totals.size_bytes,
            size_allocated_bytes: totals.size_allocated_bytes,
            entry_count: totals.entry_count,
            file_count: totals.file_count,
            directory_count: totals.directory_count,
            last_modified_time,
            owner_name,
        }
    }

    /// The totals stored in this record.
    pub fn totals(&self) -> Totals {
        Totals {
            size_bytes: self.size_bytes,
            size_allocated_bytes: self.size_allocated_bytes,
            entry_count: self.entry_count,
            file_count: self.file_count,
            directory_count: self.directory_count,
        }
    }

    /// Final path component, or the whole path for filesystem roots.
    pub fn name(&self) -> Cow<'_, str> {
        display_name(&self.path)
    }

    /// Parent directory of this record's path.
    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Check if this record describes a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Check if this record describes a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }
}

/// Name shown for a path: its final component, or the full path for roots
/// such as `/` or `C:\`.
pub fn display_name(path: &Path) -> Cow<'_, str> {
    match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => path.to_string_lossy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_totals_by_kind() {
        let file = Totals::own(EntryKind::File, 10, 4096);
        assert_eq!(file.size_bytes, 10);
        assert_eq!(file.file_count, 1);
        assert_eq!(file.entry_count, 1);

        let dir = Totals::own(EntryKind::Directory, 4096, 4096);
        assert_eq!(dir.size_bytes, 0);
        assert_eq!(dir.directory_count, 1);

        let link = Totals::own(EntryKind::Symlink, 27, 0);
        assert_eq!(link.size_bytes, 0);
        assert_eq!(link.entry_count, 1);
        assert_eq!(link.file_count, 0);
        assert_eq!(link.directory_count, 0);
    }

    #[test]
    fn test_totals_sum() {
        let total: Totals = [
            Totals::own(EntryKind::File, 10, 512),
            Totals::own(EntryKind::File, 20, 512),
            Totals::rejected(),
        ]
        .into_iter()
        .sum();

        assert_eq!(total.size_bytes, 30);
        assert_eq!(total.size_allocated_bytes, 1024);
        assert_eq!(total.entry_count, 3);
        assert_eq!(total.file_count, 2);
    }

    #[test]
    fn test_display_name_of_root() {
        assert_eq!(display_name(Path::new("/")), "/");
        assert_eq!(display_name(Path::new("/tmp/a.txt")), "a.txt");
    }
}
