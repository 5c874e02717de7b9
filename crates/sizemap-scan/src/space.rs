//! Free and total space of the volume holding a path.

use std::path::{Path, PathBuf};

use sizemap_core::{ScanError, SpaceInfo};
use sysinfo::Disks;
use tracing::debug;

/// A mounted volume and its capacity.
#[derive(Debug, Clone)]
struct Mount {
    point: PathBuf,
    total: u64,
    available: u64,
}

/// Capacity of the volume that contains `path`.
pub fn space_info(path: &Path) -> Result<SpaceInfo, ScanError> {
    let canonical = path.canonicalize().map_err(|e| ScanError::io(path, e))?;
    let target = normalize(&canonical);

    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<Mount> = disks
        .list()
        .iter()
        .map(|disk| Mount {
            point: disk.mount_point().to_path_buf(),
            total: disk.total_space(),
            available: disk.available_space(),
        })
        .collect();

    let mount = best_mount(&target, &mounts)
        .ok_or_else(|| ScanError::invalid_path(path, "no mounted volume contains this path"))?;
    debug!(path = %path.display(), mount = %mount.point.display(), "volume matched");

    Ok(SpaceInfo::new(mount.total, mount.available))
}

/// Bytes available on the volume that contains `path`.
pub fn free_space(path: &Path) -> Result<u64, ScanError> {
    space_info(path).map(|info| info.available)
}

/// Longest mount point that is a prefix of `path`.
fn best_mount<'a>(path: &Path, mounts: &'a [Mount]) -> Option<&'a Mount> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.point))
        .max_by_key(|mount| mount.point.components().count())
}

/// Strip the `\\?\` prefix `canonicalize` adds on Windows so the path
/// compares against plain `C:\` mount points.
#[cfg(windows)]
fn normalize(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC") => PathBuf::from(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(not(windows))]
fn normalize(path: &Path) -> PathBuf {
    path.to_path_buf()
}
