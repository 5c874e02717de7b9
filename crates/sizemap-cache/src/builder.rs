//! Tree materialization from flat records.
//!
//! A node's children are materialized only down to a requested number of
//! levels; deeper directories come back with `children_loaded = false`.
//! Every directory whose children are materialized and that holds both
//! files and subdirectories gets a trailing "[N files]" node.

use std::collections::HashMap;
use std::path::Path;

use sizemap_core::{AnalyticsRecord, EntryKind, Totals, TreeNode};

use crate::index::ScanIndex;

/// Answers "which records are the direct children of this path".
pub(crate) trait ChildSource {
    fn children_of(&self, path: &Path) -> Vec<&AnalyticsRecord>;
}

/// Children served from a built [`ScanIndex`].
pub(crate) struct Indexed<'a> {
    pub records: &'a [AnalyticsRecord],
    pub index: &'a ScanIndex,
}

impl ChildSource for Indexed<'_> {
    fn children_of(&self, path: &Path) -> Vec<&AnalyticsRecord> {
        self.index
            .children(path)
            .iter()
            .map(|&i| &self.records[i])
            .collect()
    }
}

/// Children found by scanning every record. Used before the index is ready.
pub(crate) struct Linear<'a>(pub &'a [AnalyticsRecord]);

impl ChildSource for Linear<'_> {
    fn children_of(&self, path: &Path) -> Vec<&AnalyticsRecord> {
        self.0
            .iter()
            .filter(|record| record.parent() == Some(path))
            .collect()
    }
}

/// Records grouped by parent in one pass, limited to the levels needed.
struct Grouped<'a>(HashMap<&'a Path, Vec<&'a AnalyticsRecord>>);

impl ChildSource for Grouped<'_> {
    fn children_of(&self, path: &Path) -> Vec<&AnalyticsRecord> {
        self.0.get(path).cloned().unwrap_or_default()
    }
}

/// Build the tree for `root`, materializing `max_depth` levels below it.
///
/// Returns `None` when `root` has no record.
pub fn build_initial_tree(
    records: &[AnalyticsRecord],
    root: &Path,
    max_depth: usize,
) -> Option<TreeNode> {
    let root_record = records.iter().find(|r| r.path == root)?;

    let mut grouped: HashMap<&Path, Vec<&AnalyticsRecord>> = HashMap::new();
    for record in records {
        let Ok(relative) = record.path.strip_prefix(root) else {
            continue;
        };
        let depth = relative.components().count();
        if depth == 0 || depth > max_depth {
            continue;
        }
        if let Some(parent) = record.parent() {
            grouped.entry(parent).or_default().push(record);
        }
    }

    Some(materialize(root_record, max_depth, &Grouped(grouped)))
}

/// Node for `record` with `levels` levels of descendants materialized.
pub(crate) fn materialize(
    record: &AnalyticsRecord,
    levels: usize,
    source: &impl ChildSource,
) -> TreeNode {
    let mut node = TreeNode::from_record(record);
    if !record.is_dir() || levels == 0 {
        return node;
    }

    let children: Vec<TreeNode> = source
        .children_of(&record.path)
        .into_iter()
        .map(|child| materialize(child, levels - 1, source))
        .collect();
    attach_children(&mut node, record, children);
    node
}

/// Install `children` under `node` and append the loose-files node when the
/// directory mixes files and subdirectories.
fn attach_children(node: &mut TreeNode, record: &AnalyticsRecord, children: Vec<TreeNode>) {
    let mut files = Totals::default();
    let mut has_subdir = false;
    for child in &children {
        match child.kind {
            EntryKind::File => {
                files += Totals::own(EntryKind::File, child.size_bytes, child.size_allocated_bytes)
            }
            EntryKind::Directory => has_subdir = true,
            EntryKind::Symlink | EntryKind::Other | EntryKind::FileGroup => {}
        }
    }

    node.set_children(children);
    if files.file_count > 0 && has_subdir {
        node.children.push(TreeNode::loose_files(record, files));
    }
}
