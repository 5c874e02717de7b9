//! Per-entry platform metadata.
//!
//! Every platform answers the same question: size, allocated size, mtime,
//! owner, storage identity and classification of one path, without
//! dereferencing symlinks. Only the syscalls differ.

use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use sizemap_core::{EntryKind, MetadataError, Totals};

use crate::owner::OwnerCache;

/// Storage identity of an entry (device + inode, or volume serial + file
/// index). Used for cycle detection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathIdentity {
    /// Device ID.
    pub device: u64,
    /// Inode number.
    pub inode: u64,
}

impl PathIdentity {
    /// Create new identity info.
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }
}

/// Metadata of a single entry, as reported by a [`MetadataProvider`].
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// Apparent size in bytes.
    pub size_bytes: u64,
    /// Bytes allocated on disk.
    pub allocated_bytes: u64,
    /// Modification time in Unix seconds (0 when unavailable).
    pub mtime: u64,
    /// Owner, when resolvable.
    pub owner_name: Option<String>,
    pub identity: PathIdentity,
    pub kind: EntryKind,
}

impl EntryMetadata {
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }

    /// Totals this entry contributes on its own.
    pub fn own_totals(&self) -> Totals {
        Totals::own(self.kind, self.size_bytes, self.allocated_bytes)
    }
}

/// Source of per-entry metadata.
pub trait MetadataProvider: Send + Sync {
    /// Query an entry without following symlinks.
    fn query(&self, path: &Path) -> Result<EntryMetadata, MetadataError>;
}

/// Metadata provider backed by the host operating system.
#[derive(Debug, Default)]
pub struct PlatformMetadata {
    owners: OwnerCache,
}

impl PlatformMetadata {
    /// Create a new provider with an empty owner cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataProvider for PlatformMetadata {
    fn query(&self, path: &Path) -> Result<EntryMetadata, MetadataError> {
        let metadata = std::fs::symlink_metadata(path).map_err(|e| MetadataError::io(path, e))?;
        let kind = classify(&metadata);
        let identity = get_identity(path, &metadata);

        Ok(EntryMetadata {
            size_bytes: metadata.len(),
            allocated_bytes: get_allocated(path, &metadata),
            mtime: modified_secs(&metadata),
            owner_name: self.owners.resolve(&metadata),
            identity,
            kind,
        })
    }
}

fn classify(metadata: &Metadata) -> EntryKind {
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

fn modified_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// Cross-platform metadata helpers

/// Get the identity and hard link count.
#[cfg(unix)]
fn get_identity(_path: &Path, metadata: &Metadata) -> PathIdentity {
    PathIdentity::new(metadata.dev(), metadata.ino())
}

#[cfg(windows)]
fn get_identity(path: &Path, _metadata: &Metadata) -> PathIdentity {
    windows_fs::file_identity(path).unwrap_or_else(|| path_hash_identity(path))
}

#[cfg(not(any(unix, windows)))]
fn get_identity(path: &Path, _metadata: &Metadata) -> PathIdentity {
    path_hash_identity(path)
}

/// Identity derived from the path itself, for platforms without inodes.
#[cfg(not(unix))]
fn path_hash_identity(path: &Path) -> PathIdentity {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    PathIdentity::new(0, hasher.finish())
}

/// Get the allocated size on disk.
#[cfg(unix)]
fn get_allocated(_path: &Path, metadata: &Metadata) -> u64 {
    // st_blocks is always in 512-byte units
    metadata.blocks() * 512
}

#[cfg(windows)]
fn get_allocated(path: &Path, metadata: &Metadata) -> u64 {
    windows_fs::compressed_size(path).unwrap_or_else(|| metadata.len().div_ceil(4096) * 4096)
}

#[cfg(not(any(unix, windows)))]
fn get_allocated(_path: &Path, metadata: &Metadata) -> u64 {
    metadata.len().div_ceil(512) * 512
}

#[cfg(windows)]
mod windows_fs {
    use std::fs::OpenOptions;
    use std::os::windows::ffi::OsStrExt;
    use std::os::windows::fs::OpenOptionsExt;
    use std::os::windows::io::AsRawHandle;
    use std::path::Path;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Storage::FileSystem::{
        BY_HANDLE_FILE_INFORMATION, GetCompressedFileSizeW, GetFileInformationByHandle,
        INVALID_FILE_SIZE,
    };
    use windows::core::PCWSTR;

    use super::PathIdentity;

    const FILE_READ_ATTRIBUTES: u32 = 0x0080;
    const FILE_FLAG_BACKUP_SEMANTICS: u32 = 0x0200_0000;
    const FILE_FLAG_OPEN_REPARSE_POINT: u32 = 0x0020_0000;

    /// Volume serial + file index, opened with attribute-only access so the
    /// file contents are never touched.
    pub(super) fn file_identity(path: &Path) -> Option<PathIdentity> {
        let file = OpenOptions::new()
            .access_mode(FILE_READ_ATTRIBUTES)
            .custom_flags(FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OPEN_REPARSE_POINT)
            .open(path)
            .ok()?;

        let mut info = BY_HANDLE_FILE_INFORMATION::default();
        let handle = HANDLE(file.as_raw_handle());
        unsafe { GetFileInformationByHandle(handle, &mut info) }.ok()?;

        let index = (u64::from(info.nFileIndexHigh) << 32) | u64::from(info.nFileIndexLow);
        Some(PathIdentity::new(
            u64::from(info.dwVolumeSerialNumber),
            index,
        ))
    }

    pub(super) fn compressed_size(path: &Path) -> Option<u64> {
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let mut high: u32 = 0;
        let low = unsafe { GetCompressedFileSizeW(PCWSTR(wide.as_ptr()), Some(&mut high)) };
        if low == INVALID_FILE_SIZE {
            return None;
        }
        Some((u64::from(high) << 32) | u64::from(low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_query_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        fs::write(&path, vec![0u8; 1500]).unwrap();

        let meta = PlatformMetadata::new().query(&path).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.size_bytes, 1500);
        assert!(meta.mtime > 0);
        assert_eq!(meta.own_totals().file_count, 1);
    }

    #[test]
    fn test_query_missing_is_vanished() {
        let temp = TempDir::new().unwrap();
        let err = PlatformMetadata::new()
            .query(&temp.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, MetadataError::Vanished { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_not_dereferenced() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target.bin");
        fs::write(&target, vec![0u8; 4096]).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let provider = PlatformMetadata::new();
        let link_meta = provider.query(&link).unwrap();
        let target_meta = provider.query(&target).unwrap();

        assert!(link_meta.is_symlink());
        assert_ne!(link_meta.identity, target_meta.identity);
        assert_eq!(link_meta.own_totals().size_bytes, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_links_share_identity() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("original");
        fs::write(&original, "shared").unwrap();
        let alias = temp.path().join("alias");
        fs::hard_link(&original, &alias).unwrap();

        let provider = PlatformMetadata::new();
        let a = provider.query(&original).unwrap();
        let b = provider.query(&alias).unwrap();

        assert_eq!(a.identity, b.identity);
    }
}
