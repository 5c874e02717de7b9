//! Lookup indices over a scan's records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use rayon::prelude::*;
use sizemap_core::AnalyticsRecord;

/// `path_map` and `children_map` for one record set.
///
/// Both map into positions of the record slice they were built from; the
/// index is only meaningful next to that slice.
#[derive(Debug, Default)]
pub struct ScanIndex {
    path_map: HashMap<PathBuf, usize>,
    children_map: HashMap<PathBuf, Vec<usize>>,
}

impl ScanIndex {
    /// Build both maps. Child lists are sorted by size descending, then path.
    pub fn build(records: &[AnalyticsRecord]) -> Self {
        let path_map: HashMap<PathBuf, usize> = records
            .par_iter()
            .enumerate()
            .map(|(i, record)| (record.path.clone(), i))
            .collect();

        let grouped: DashMap<PathBuf, Vec<usize>> = DashMap::new();
        records.par_iter().enumerate().for_each(|(i, record)| {
            if let Some(parent) = record.parent() {
                grouped.entry(parent.to_path_buf()).or_default().push(i);
            }
        });

        let mut children_map: HashMap<PathBuf, Vec<usize>> = grouped.into_iter().collect();
        children_map.par_iter_mut().for_each(|(_, children)| {
            children.sort_unstable_by(|&a, &b| {
                records[b]
                    .size_bytes
                    .cmp(&records[a].size_bytes)
                    .then_with(|| records[a].path.cmp(&records[b].path))
            });
        });

        Self {
            path_map,
            children_map,
        }
    }

    /// Position of the record for `path`.
    pub fn position(&self, path: &Path) -> Option<usize> {
        self.path_map.get(path).copied()
    }

    /// Positions of the direct children of `path`, largest first.
    pub fn children(&self, path: &Path) -> &[usize] {
        self.children_map
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of indexed paths.
    pub fn len(&self) -> usize {
        self.path_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_map.is_empty()
    }
}
