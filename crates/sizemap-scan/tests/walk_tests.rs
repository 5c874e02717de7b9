use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sizemap_scan::{
    AnalyticsRecord, EntryKind, EntryMetadata, MetadataError, MetadataProvider, PlatformMetadata,
    Populate, PopulateContext, Populated, ProgressSink, ScanConfig, ScanEvent, WalkStrategy,
    WarningKind, build_pool, populate_with_fallback,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn canonical_temp() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = temp.path().canonicalize().unwrap();
    (temp, root)
}

fn walk_with(provider: Arc<dyn MetadataProvider>, root: &Path, sink: &ProgressSink) -> Populated {
    let walk = WalkStrategy::new(provider, Arc::new(build_pool(4).unwrap()));
    let config = ScanConfig::new(root);
    let cancel = CancellationToken::new();
    walk.populate(
        root,
        PopulateContext {
            config: &config,
            sink,
            cancel: &cancel,
        },
    )
    .unwrap()
}

fn walk(root: &Path) -> Populated {
    walk_with(Arc::new(PlatformMetadata::new()), root, &ProgressSink::new(16))
}

fn record<'a>(populated: &'a Populated, path: &Path) -> &'a AnalyticsRecord {
    populated
        .records
        .iter()
        .find(|r| r.path == path)
        .unwrap_or_else(|| panic!("no record for {}", path.display()))
}

#[test]
fn test_directory_sizes_sum_children() {
    let (_temp, root) = canonical_temp();
    fs::write(root.join("a"), vec![0u8; 10]).unwrap();
    fs::write(root.join("b"), vec![0u8; 20]).unwrap();
    fs::create_dir(root.join("c")).unwrap();
    fs::write(root.join("c/d"), vec![0u8; 5]).unwrap();

    let populated = walk(&root);

    assert_eq!(record(&populated, &root).size_bytes, 35);
    assert_eq!(record(&populated, &root.join("c")).size_bytes, 5);
    assert_eq!(record(&populated, &root.join("a")).size_bytes, 10);
    assert_eq!(populated.records.len(), 5);
    assert!(populated.warnings.is_empty());
}

#[test]
fn test_allocated_size_recorded() {
    let (_temp, root) = canonical_temp();
    fs::write(root.join("a"), vec![1u8; 10_000]).unwrap();

    let populated = walk(&root);
    let file = record(&populated, &root.join("a"));
    assert!(file.size_allocated_bytes > 0);
    assert_eq!(
        record(&populated, &root).size_allocated_bytes,
        file.size_allocated_bytes
    );
}

#[cfg(unix)]
#[test]
fn test_symlink_excluded_from_size() {
    let (_temp, root) = canonical_temp();
    fs::write(root.join("file"), vec![0u8; 10]).unwrap();
    std::os::unix::fs::symlink(root.join("file"), root.join("link")).unwrap();

    let populated = walk(&root);
    let top = record(&populated, &root);

    assert_eq!(top.size_bytes, 10);
    assert_eq!(top.file_count, 1);
    assert_eq!(top.entry_count, 2);
    assert_eq!(record(&populated, &root.join("link")).kind, EntryKind::Symlink);
}

#[cfg(unix)]
#[test]
fn test_symlink_to_ancestor_terminates() {
    let (_temp, root) = canonical_temp();
    fs::create_dir_all(root.join("a/b")).unwrap();
    fs::write(root.join("a/b/data"), vec![0u8; 64]).unwrap();
    std::os::unix::fs::symlink(&root, root.join("a/b/loop")).unwrap();

    let populated = walk(&root);

    assert_eq!(record(&populated, &root).size_bytes, 64);
    assert_eq!(record(&populated, &root).file_count, 1);
    assert!(
        !populated
            .records
            .iter()
            .any(|r| r.path.starts_with(root.join("a/b/loop/a")))
    );
}

#[cfg(unix)]
#[test]
fn test_hard_links_counted_once() {
    let (_temp, root) = canonical_temp();
    fs::write(root.join("original"), vec![0u8; 100]).unwrap();
    fs::hard_link(root.join("original"), root.join("alias")).unwrap();

    let populated = walk(&root);
    let top = record(&populated, &root);

    assert_eq!(top.size_bytes, 100);
    assert_eq!(top.file_count, 1);
    // The alias still counts as an entry of its parent.
    assert_eq!(top.entry_count, 2);
    assert_eq!(populated.records.len(), 2);
}

#[test]
fn test_scans_are_idempotent() {
    let (_temp, root) = canonical_temp();
    for dir in ["x", "x/y", "z"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    for (i, file) in ["x/1", "x/y/2", "z/3", "4"].iter().enumerate() {
        fs::write(root.join(file), vec![0u8; (i + 1) * 100]).unwrap();
    }

    let first = walk(&root);
    let second = walk(&root);
    assert_eq!(first.records, second.records);
}

/// Provider that refuses one path.
struct Failing {
    inner: PlatformMetadata,
    denied: PathBuf,
}

impl MetadataProvider for Failing {
    fn query(&self, path: &Path) -> Result<EntryMetadata, MetadataError> {
        if path == self.denied {
            return Err(MetadataError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        self.inner.query(path)
    }
}

#[test]
fn test_metadata_failure_degrades_to_warning() {
    let (_temp, root) = canonical_temp();
    fs::write(root.join("ok"), vec![0u8; 7]).unwrap();
    fs::write(root.join("secret"), vec![0u8; 1000]).unwrap();

    let provider = Failing {
        inner: PlatformMetadata::new(),
        denied: root.join("secret"),
    };
    let populated = walk_with(Arc::new(provider), &root, &ProgressSink::new(16));

    assert_eq!(record(&populated, &root).size_bytes, 7);
    assert_eq!(populated.warnings.len(), 1);
    assert_eq!(populated.warnings[0].kind, WarningKind::PermissionDenied);
}

#[test]
fn test_progress_events_cover_every_record() {
    let (_temp, root) = canonical_temp();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/file"), "abc").unwrap();

    let sink = ProgressSink::new(64);
    let mut rx = sink.subscribe();
    let populated = walk_with(Arc::new(PlatformMetadata::new()), &root, &sink);

    let mut leaves = 0;
    let mut directories = 0;
    let mut finished = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            ScanEvent::Leaf(_) => leaves += 1,
            ScanEvent::Directory(_) => directories += 1,
            ScanEvent::Finished { records, .. } => {
                finished = true;
                assert_eq!(records, populated.records.len());
            }
            _ => {}
        }
    }

    assert_eq!(leaves, 1);
    assert_eq!(directories, 2);
    assert!(finished);
}

#[test]
fn test_fallback_chain_reaches_walk() {
    let (_temp, root) = canonical_temp();
    fs::write(root.join("f"), "12345").unwrap();

    let provider: Arc<dyn MetadataProvider> = Arc::new(PlatformMetadata::new());
    let walk = WalkStrategy::new(provider.clone(), Arc::new(build_pool(1).unwrap()));
    let bulk = sizemap_scan::platform_bulk_reader(provider);

    let mut chain: Vec<&dyn Populate> = Vec::new();
    if let Some(bulk) = bulk.as_deref() {
        chain.push(bulk);
    }
    chain.push(&walk);

    let config = ScanConfig::new(&root);
    let sink = ProgressSink::new(4);
    let cancel = CancellationToken::new();
    let populated = populate_with_fallback(
        &chain,
        &root,
        PopulateContext {
            config: &config,
            sink: &sink,
            cancel: &cancel,
        },
    )
    .unwrap();

    assert_eq!(record(&populated, &root).size_bytes, 5);
}
