//! Tree nodes handed to consumers and the terminal scan result.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::ScanWarning;
use crate::record::{AnalyticsRecord, EntryKind, Totals};

/// Percentage of `part` in `whole`, 0 when `whole` is 0.
pub fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// A node of the expandable size tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Full path (synthetic for virtual nodes).
    pub path: PathBuf,
    /// Display name.
    pub name: CompactString,
    /// Entry classification.
    pub kind: EntryKind,
    pub size_bytes: u64,
    pub size_allocated_bytes: u64,
    pub entry_count: u64,
    pub file_count: u64,
    pub directory_count: u64,
    /// Share of the immediate parent's `size_bytes`, 0–100.
    pub percent_of_parent: f64,
    /// Unix seconds.
    pub last_modified_time: u64,
    pub owner_name: Option<String>,
    /// Synthetic node summarizing the loose files of its parent.
    pub is_virtual: bool,
    /// `false` when this directory's children have not been materialized
    /// yet; an empty list is then "not loaded", not "empty".
    pub children_loaded: bool,
    /// Children sorted by size descending, virtual node last.
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Create a childless node from a record. Directories start unloaded.
    pub fn from_record(record: &AnalyticsRecord) -> Self {
        Self {
            path: record.path.clone(),
            name: CompactString::new(record.name()),
            kind: record.kind,
            size_bytes: record.size_bytes,
            size_allocated_bytes: record.size_allocated_bytes,
            entry_count: record.entry_count,
            file_count: record.file_count,
            directory_count: record.directory_count,
            percent_of_parent: 100.0,
            last_modified_time: record.last_modified_time,
            owner_name: record.owner_name.clone(),
            is_virtual: false,
            children_loaded: !record.is_dir(),
            children: Vec::new(),
        }
    }

    /// Create the synthetic "loose files" node for a directory.
    pub fn loose_files(parent: &AnalyticsRecord, files: Totals) -> Self {
        let name = format!("[{} files]", files.file_count);
        Self {
            path: parent.path.join(&name),
            name: CompactString::from(name),
            kind: EntryKind::FileGroup,
            size_bytes: files.size_bytes,
            size_allocated_bytes: files.size_allocated_bytes,
            entry_count: files.entry_count,
            file_count: files.file_count,
            directory_count: 0,
            percent_of_parent: percent_of(files.size_bytes, parent.size_bytes),
            last_modified_time: parent.last_modified_time,
            owner_name: parent.owner_name.clone(),
            is_virtual: true,
            children_loaded: true,
            children: Vec::new(),
        }
    }

    /// Install a fully known child list: sort by size descending, compute
    /// each child's share of this node, mark loaded.
    pub fn set_children(&mut self, mut children: Vec<TreeNode>) {
        children.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        for child in &mut children {
            child.percent_of_parent = percent_of(child.size_bytes, self.size_bytes);
        }
        self.children = children;
        self.children_loaded = true;
    }

    /// Check if this node is a real directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Which populate strategy produced a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    /// Directory-by-directory traversal.
    Walk,
    /// Bulk read of the volume's metadata table.
    BulkTable,
}

/// Terminal result of a completed scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Canonical root path that was scanned.
    pub root_path: PathBuf,
    /// Initial, depth-bounded tree.
    pub tree: TreeNode,
    /// Duration of the scan.
    pub scan_duration: Duration,
    /// When this scan finished.
    pub scanned_at: SystemTime,
    /// Strategy that populated the records.
    pub strategy: ScanStrategy,
    /// Warnings encountered during scan.
    pub warnings: Vec<ScanWarning>,
}

impl ScanResult {
    /// Create a new scan result.
    pub fn new(
        root_path: PathBuf,
        tree: TreeNode,
        scan_duration: Duration,
        strategy: ScanStrategy,
        warnings: Vec<ScanWarning>,
    ) -> Self {
        Self {
            root_path,
            tree,
            scan_duration,
            scanned_at: SystemTime::now(),
            strategy,
            warnings,
        }
    }

    /// Get the total size of the tree.
    pub fn total_size(&self) -> u64 {
        self.tree.size_bytes
    }

    /// Check if there were any warnings during scan.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, kind: EntryKind, size: u64) -> AnalyticsRecord {
        AnalyticsRecord::new(path, kind, Totals::own(kind, size, size), 0, None)
    }

    #[test]
    fn test_percent_of_zero_parent() {
        assert_eq!(percent_of(10, 0), 0.0);
        assert_eq!(percent_of(25, 100), 25.0);
    }

    #[test]
    fn test_from_record_directory_unloaded() {
        let node = TreeNode::from_record(&record("/a/dir", EntryKind::Directory, 0));
        assert!(!node.children_loaded);
        assert_eq!(node.name, "dir");

        let node = TreeNode::from_record(&record("/a/file", EntryKind::File, 3));
        assert!(node.children_loaded);
    }

    #[test]
    fn test_set_children_sorts_and_computes_percent() {
        let mut parent = TreeNode::from_record(&AnalyticsRecord::new(
            "/a",
            EntryKind::Directory,
            Totals {
                size_bytes: 40,
                ..Totals::default()
            },
            0,
            None,
        ));
        parent.set_children(vec![
            TreeNode::from_record(&record("/a/small", EntryKind::File, 10)),
            TreeNode::from_record(&record("/a/big", EntryKind::File, 30)),
        ]);

        assert!(parent.children_loaded);
        assert_eq!(parent.children[0].name, "big");
        assert_eq!(parent.children[0].percent_of_parent, 75.0);
        assert_eq!(parent.children[1].percent_of_parent, 25.0);
        assert_eq!(parent.children[1].path, PathBuf::from("/a/small"));
    }

    #[test]
    fn test_loose_files_node_is_not_a_directory() {
        let parent = AnalyticsRecord::new(
            "/a",
            EntryKind::Directory,
            Totals {
                size_bytes: 40,
                ..Totals::default()
            },
            0,
            None,
        );
        let files = Totals::own(EntryKind::File, 10, 10) + Totals::own(EntryKind::File, 20, 20);
        let node = TreeNode::loose_files(&parent, files);

        assert_eq!(node.kind, EntryKind::FileGroup);
        assert!(!node.is_dir());
        assert!(node.is_virtual);
        assert!(node.children_loaded);
        assert_eq!(node.name, "[2 files]");
        assert_eq!(node.percent_of_parent, 75.0);
    }
}
