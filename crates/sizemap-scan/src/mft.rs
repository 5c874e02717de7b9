//! NTFS Master File Table as a [`VolumeTable`].
//!
//! `FSCTL_ENUM_USN_DATA` yields one USN record per MFT entry: reference
//! number, parent reference, attributes and name, without any directory
//! traversal. Paths are rebuilt from the parent chain and every entry under
//! the scan root is then stat'ed in parallel through the metadata provider,
//! since USN records carry no sizes.
//!
//! Requires an NTFS volume and an elevated process.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Component, Path, PathBuf, Prefix};
use std::sync::Arc;

use rayon::prelude::*;
use sizemap_core::{ScanWarning, WarningKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use windows::Win32::Foundation::{CloseHandle, ERROR_HANDLE_EOF, HANDLE};
use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_DIRECTORY, FILE_SHARE_READ, FILE_SHARE_WRITE, GetVolumeInformationW,
    OPEN_EXISTING,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::Win32::System::Ioctl::FSCTL_ENUM_USN_DATA;
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};
use windows::core::PCWSTR;

use crate::bulk::{FlatEntry, TableRead, VolumeTable};
use crate::metadata::MetadataProvider;
use crate::strategy::PopulateError;

/// Upper bound on buffered MFT rows before the read is truncated.
pub const MAX_MFT_RECORDS: usize = 15_000_000;

/// The NTFS root directory always has MFT reference 5.
const ROOT_REF: u64 = 5;
/// References 0–23 are reserved for NTFS metafiles.
const LAST_RESERVED_REF: u64 = 23;
const REF_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const GENERIC_READ: u32 = 0x8000_0000;
/// Longest parent chain followed before a row is treated as corrupt.
const MAX_CHAIN: usize = 4096;

/// Check whether the current process runs elevated.
pub fn is_elevated() -> bool {
    unsafe {
        let mut token = HANDLE::default();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        let result = GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut c_void),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        );
        let _ = CloseHandle(token);

        result.is_ok() && elevation.TokenIsElevated != 0
    }
}

/// MFT reader for the volume holding the scan root.
pub struct NtfsTable {
    provider: Arc<dyn MetadataProvider>,
}

impl NtfsTable {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }
}

impl VolumeTable for NtfsTable {
    fn check_available(&self, root: &Path) -> Result<(), PopulateError> {
        if !is_elevated() {
            return Err(PopulateError::unavailable("process is not elevated"));
        }
        let drive = drive_letter(root)
            .ok_or_else(|| PopulateError::unavailable("root is not on a lettered volume"))?;

        let fs_name = filesystem_name(drive)
            .ok_or_else(|| PopulateError::unavailable("volume information unavailable"))?;
        if fs_name != "NTFS" {
            return Err(PopulateError::unavailable(format!(
                "filesystem is {fs_name}, not NTFS"
            )));
        }
        Ok(())
    }

    fn read_table(&self, root: &Path, cancel: &CancellationToken) -> Result<TableRead, PopulateError> {
        let drive = drive_letter(root)
            .ok_or_else(|| PopulateError::unavailable("root is not on a lettered volume"))?;
        let volume = Volume::open(drive)?;

        let mut warnings = Vec::new();
        let rows = volume.enumerate(cancel, &mut warnings)?;
        drop(volume);
        debug!(rows = rows.len(), "MFT enumerated");

        let volume_root: PathBuf = root.components().take(2).collect();
        let paths = resolve_paths(&rows, &volume_root, root);
        if cancel.is_cancelled() {
            return Err(PopulateError::Cancelled);
        }

        let stats: Vec<_> = paths
            .par_iter()
            .map(|path| (path, self.provider.query(path)))
            .collect();

        let mut entries = Vec::with_capacity(stats.len());
        for (path, result) in stats {
            match result {
                Ok(metadata) => entries.push(FlatEntry {
                    path: path.clone(),
                    metadata,
                }),
                Err(err) => warnings.push(ScanWarning::from(&err)),
            }
        }

        Ok(TableRead { entries, warnings })
    }
}

/// One USN record reduced to what path rebuilding needs.
struct MftRow {
    parent_ref: u64,
    name: String,
    is_dir: bool,
}

/// Raw volume handle, closed on drop.
struct Volume {
    handle: HANDLE,
    drive: char,
}

impl Volume {
    fn open(drive: char) -> Result<Self, PopulateError> {
        let path = format!("\\\\.\\{drive}:");
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                GENERIC_READ,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                Default::default(),
                None,
            )
        }
        .map_err(|e| PopulateError::unavailable(format!("cannot open volume {path}: {e}")))?;
        Ok(Self { handle, drive })
    }

    fn enumerate(
        &self,
        cancel: &CancellationToken,
        warnings: &mut Vec<ScanWarning>,
    ) -> Result<HashMap<u64, MftRow>, PopulateError> {
        // MFT_ENUM_DATA_V0
        #[repr(C)]
        struct EnumData {
            start_file_reference_number: u64,
            low_usn: i64,
            high_usn: i64,
        }

        let mut enum_data = EnumData {
            start_file_reference_number: 0,
            low_usn: 0,
            high_usn: i64::MAX,
        };
        let mut buf = vec![0u8; 256 * 1024];
        let mut rows = HashMap::with_capacity(1 << 20);

        'enumerate: loop {
            if cancel.is_cancelled() {
                return Err(PopulateError::Cancelled);
            }

            let mut returned = 0u32;
            let ok = unsafe {
                DeviceIoControl(
                    self.handle,
                    FSCTL_ENUM_USN_DATA,
                    Some(&enum_data as *const EnumData as *const c_void),
                    std::mem::size_of::<EnumData>() as u32,
                    Some(buf.as_mut_ptr() as *mut c_void),
                    buf.len() as u32,
                    Some(&mut returned),
                    None,
                )
            };
            if let Err(err) = ok {
                if is_end_of_table(&err) {
                    break;
                }
                return Err(PopulateError::unavailable(format!(
                    "MFT enumeration of {}: failed after {} rows: {err}",
                    self.drive,
                    rows.len()
                )));
            }
            if returned <= 8 {
                break;
            }

            let filled = &buf[..returned as usize];
            let Some(next_start) = read_u64(filled, 0) else {
                break;
            };

            let mut offset = 8;
            while let Some((file_ref, row, len)) = parse_usn_record(filled, offset) {
                if rows.len() >= MAX_MFT_RECORDS {
                    warn!("MFT row limit ({MAX_MFT_RECORDS}) reached, truncating volume read");
                    warnings.push(ScanWarning::new(
                        format!("{}:\\", self.drive),
                        format!("Volume read truncated after {MAX_MFT_RECORDS} entries"),
                        WarningKind::ReadError,
                    ));
                    break 'enumerate;
                }
                if let Some(row) = row {
                    rows.insert(file_ref, row);
                }
                offset += len;
            }

            enum_data.start_file_reference_number = next_start;
        }

        Ok(rows)
    }
}

/// `FSCTL_ENUM_USN_DATA` reports the end of the table as `ERROR_HANDLE_EOF`.
fn is_end_of_table(err: &windows::core::Error) -> bool {
    err.code() == ERROR_HANDLE_EOF.to_hresult()
}

impl Drop for Volume {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2)?.try_into().ok().map(u16::from_le_bytes)
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)?.try_into().ok().map(u32::from_le_bytes)
}

fn read_u64(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8)?.try_into().ok().map(u64::from_le_bytes)
}

/// Parse the USN_RECORD_V2 at `base`. Returns the file reference, the row
/// (`None` for metafiles and malformed names) and the record length.
///
/// Layout: 0 RecordLength, 8 FileReferenceNumber, 16 ParentFileReferenceNumber,
/// 52 FileAttributes, 56 FileNameLength, 58 FileNameOffset.
fn parse_usn_record(buf: &[u8], base: usize) -> Option<(u64, Option<MftRow>, usize)> {
    let len = read_u32(buf, base)? as usize;
    if len == 0 || base + len > buf.len() {
        return None;
    }
    if len < 60 {
        return Some((0, None, len));
    }

    let file_ref = read_u64(buf, base + 8)? & REF_MASK;
    let parent_ref = read_u64(buf, base + 16)? & REF_MASK;
    let attributes = read_u32(buf, base + 52)?;
    let name_len = read_u16(buf, base + 56)? as usize;
    let name_offset = read_u16(buf, base + 58)? as usize;

    let name_start = base + name_offset;
    let name_end = name_start + name_len;
    if name_len == 0 || name_end > base + len || file_ref <= LAST_RESERVED_REF {
        return Some((file_ref, None, len));
    }

    let name: String = char::decode_utf16(
        buf[name_start..name_end]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]])),
    )
    .map(|r| r.unwrap_or('\u{FFFD}'))
    .collect();
    if name.starts_with('$') {
        return Some((file_ref, None, len));
    }

    Some((
        file_ref,
        Some(MftRow {
            parent_ref,
            name,
            is_dir: attributes & FILE_ATTRIBUTE_DIRECTORY.0 != 0,
        }),
        len,
    ))
}

/// Rebuild absolute paths and keep those strictly below `root`.
///
/// Only directory paths are memoized; a row whose parent chain runs through
/// a non-directory or never reaches the volume root is dropped.
fn resolve_paths(rows: &HashMap<u64, MftRow>, volume_root: &Path, root: &Path) -> Vec<PathBuf> {
    let mut resolved: HashMap<u64, Option<PathBuf>> = HashMap::with_capacity(rows.len());
    resolved.insert(ROOT_REF, Some(volume_root.to_path_buf()));

    let mut out = Vec::new();
    for &file_ref in rows.keys() {
        if let Some(path) = resolve(file_ref, rows, &mut resolved) {
            if path != root && path.starts_with(root) {
                out.push(path);
            }
        }
    }
    out
}

fn resolve(
    file_ref: u64,
    rows: &HashMap<u64, MftRow>,
    resolved: &mut HashMap<u64, Option<PathBuf>>,
) -> Option<PathBuf> {
    let mut chain = Vec::new();
    let mut current = file_ref;
    let mut base = loop {
        if let Some(known) = resolved.get(&current) {
            break known.clone();
        }
        if chain.len() >= MAX_CHAIN {
            break None;
        }
        match rows.get(&current) {
            Some(row) if row.is_dir || chain.is_empty() => {
                chain.push(current);
                current = row.parent_ref;
            }
            _ => break None,
        }
    };

    for &link in chain.iter().rev() {
        let Some(row) = rows.get(&link) else {
            return None;
        };
        base = base.map(|parent| parent.join(&row.name));
        if row.is_dir {
            resolved.insert(link, base.clone());
        }
    }
    base
}

fn drive_letter(root: &Path) -> Option<char> {
    match root.components().next()? {
        Component::Prefix(prefix) => match prefix.kind() {
            Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                Some(char::from(letter).to_ascii_uppercase())
            }
            _ => None,
        },
        _ => None,
    }
}

fn filesystem_name(drive: char) -> Option<String> {
    let root: Vec<u16> = format!("{drive}:\\")
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    let mut fs_buf = [0u16; 64];

    unsafe {
        GetVolumeInformationW(
            PCWSTR(root.as_ptr()),
            None,
            None,
            None,
            None,
            Some(&mut fs_buf),
        )
    }
    .ok()?;

    let end = fs_buf.iter().position(|&c| c == 0).unwrap_or(fs_buf.len());
    Some(String::from_utf16_lossy(&fs_buf[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(parent_ref: u64, name: &str, is_dir: bool) -> MftRow {
        MftRow {
            parent_ref,
            name: name.to_string(),
            is_dir,
        }
    }

    #[test]
    fn test_resolve_paths_filters_to_root() {
        let rows = HashMap::from([
            (30, row(ROOT_REF, "Users", true)),
            (31, row(30, "alice", true)),
            (32, row(31, "notes.txt", false)),
            (33, row(ROOT_REF, "Windows", true)),
            // Parent is a file: not a valid chain.
            (34, row(32, "bogus", false)),
        ]);

        let mut paths = resolve_paths(
            &rows,
            Path::new(r"C:\"),
            Path::new(r"C:\Users"),
        );
        paths.sort();

        assert_eq!(
            paths,
            vec![
                PathBuf::from(r"C:\Users\alice"),
                PathBuf::from(r"C:\Users\alice\notes.txt"),
            ]
        );
    }

    #[test]
    fn test_drive_letter() {
        assert_eq!(drive_letter(Path::new(r"\\?\d:\data")), Some('D'));
        assert_eq!(drive_letter(Path::new(r"C:\")), Some('C'));
        assert_eq!(drive_letter(Path::new(r"\\server\share")), None);
    }

    #[test]
    fn test_only_eof_ends_enumeration() {
        use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_INVALID_HANDLE};

        let eof = windows::core::Error::from(ERROR_HANDLE_EOF.to_hresult());
        let denied = windows::core::Error::from(ERROR_ACCESS_DENIED.to_hresult());
        let bad_handle = windows::core::Error::from(ERROR_INVALID_HANDLE.to_hresult());

        assert!(is_end_of_table(&eof));
        assert!(!is_end_of_table(&denied));
        assert!(!is_end_of_table(&bad_handle));
    }
}
