//! Cycle and alias detection for a single scan.

use std::path::{Path, PathBuf};

use dashmap::DashSet;

use sizemap_core::EntryKind;

use crate::metadata::{EntryMetadata, PathIdentity};

/// Tracks storage identities and canonical directory paths already visited.
///
/// Admission is atomic: when two workers race to admit the same identity,
/// exactly one wins. A rejected entry is an alias (hard link, bind mount,
/// junction, symlink loop) of something already counted.
#[derive(Debug, Default)]
pub struct CycleGuard {
    identities: DashSet<PathIdentity>,
    paths: DashSet<PathBuf>,
}

impl CycleGuard {
    /// Create a new, empty guard.
    pub fn new() -> Self {
        Self {
            identities: DashSet::new(),
            paths: DashSet::new(),
        }
    }

    /// Admit a storage identity. Returns `true` the first time it is seen.
    pub fn admit(&self, identity: PathIdentity) -> bool {
        self.identities.insert(identity)
    }

    /// Admit a directory by its canonical path. Returns `true` the first time
    /// the resolved location is seen, and also when it cannot be resolved.
    pub fn admit_path(&self, path: &Path) -> bool {
        match std::fs::canonicalize(path) {
            Ok(canonical) => self.paths.insert(canonical),
            Err(_) => true,
        }
    }

    /// Decide whether an enumerated entry is counted.
    ///
    /// Symlinks are never followed and always admitted. Files go through the
    /// identity check, directories through both the identity and the path
    /// check.
    pub fn admit_entry(&self, path: &Path, meta: &EntryMetadata) -> bool {
        match meta.kind {
            EntryKind::Symlink | EntryKind::FileGroup => true,
            EntryKind::Directory => self.admit(meta.identity) && self.admit_path(path),
            EntryKind::File | EntryKind::Other => self.admit(meta.identity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_admit_once() {
        let guard = CycleGuard::new();
        let identity = PathIdentity::new(1, 12345);

        assert!(guard.admit(identity));
        assert!(!guard.admit(identity));
    }

    #[test]
    fn test_different_devices() {
        let guard = CycleGuard::new();

        assert!(guard.admit(PathIdentity::new(1, 12345)));
        assert!(guard.admit(PathIdentity::new(2, 12345)));
        assert!(!guard.admit(PathIdentity::new(2, 12345)));
    }

    #[test]
    fn test_admit_path_resolves_aliases() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a");
        std::fs::create_dir(&dir).unwrap();

        let guard = CycleGuard::new();
        assert!(guard.admit_path(&dir));
        assert!(!guard.admit_path(&temp.path().join("a/../a")));
    }

    #[test]
    fn test_concurrent_admission_has_one_winner() {
        use rayon::prelude::*;

        let guard = CycleGuard::new();
        let winners = (0..64)
            .into_par_iter()
            .filter(|_| guard.admit(PathIdentity::new(7, 7)))
            .count();

        assert_eq!(winners, 1);
    }

    fn meta(kind: EntryKind, inode: u64) -> EntryMetadata {
        EntryMetadata {
            size_bytes: 1,
            allocated_bytes: 1,
            mtime: 0,
            owner_name: None,
            identity: PathIdentity::new(1, inode),
            kind,
        }
    }

    #[test]
    fn test_admit_entry_by_kind() {
        let guard = CycleGuard::new();
        let path = Path::new("/nonexistent/entry");

        assert!(guard.admit_entry(path, &meta(EntryKind::File, 6)));
        assert!(!guard.admit_entry(path, &meta(EntryKind::File, 6)));

        assert!(guard.admit_entry(path, &meta(EntryKind::Symlink, 7)));
        assert!(guard.admit_entry(path, &meta(EntryKind::Symlink, 7)));

        assert!(guard.admit_entry(path, &meta(EntryKind::Directory, 8)));
        assert!(!guard.admit_entry(path, &meta(EntryKind::Directory, 8)));
    }
}
