//! End-to-end extraction tests.

use std::sync::{Arc, Mutex};

use cairn_store::{BlobStore, FileStore, MemoryStore};
use cairn_tree::DirectoryNode;
use cairn_types::{ExtractConfig, FileFlags};
use tokio_util::sync::CancellationToken;

use super::helpers::*;
use crate::error::EngineError;
use crate::extract::Extractor;
use crate::progress::{ProgressSink, StatsSnapshot};

#[derive(Default)]
struct Recorder(Mutex<Vec<StatsSnapshot>>);

impl ProgressSink for Recorder {
    fn report(&self, snapshot: &StatsSnapshot) {
        self.0.lock().expect("lock poisoned").push(*snapshot);
    }
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_extract_reproduces_files() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let files = sample_files();
    let root = build_tree(store.clone(), &files).await;

    let dest = tempfile::tempdir().unwrap();
    let extractor = Extractor::new(store, tight_pipeline()).unwrap();
    let summary = extractor.extract(&root, dest.path()).await.unwrap();

    assert_extracted(dest.path(), &files);
    assert_eq!(summary.files, files.len() as u64);
    let total: usize = files.iter().map(|(_, d, _)| d.len()).sum();
    assert_eq!(summary.bytes, total as u64);
    assert!(!summary.cancelled);
    // root, a, a/c, bin, big
    assert_eq!(summary.directories, 5);

    let empty = std::fs::metadata(dest.path().join("empty")).unwrap();
    assert!(empty.is_file());
    assert_eq!(empty.len(), 0);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_extract_with_locality_batches() {
    let store = segmented_store();
    let files = sample_files();
    let root = build_tree(store.clone(), &files).await;

    let dest = tempfile::tempdir().unwrap();
    let config = ExtractConfig {
        batch_limit: 8,
        ..tight_pipeline()
    };
    let extractor = Extractor::new(store, config).unwrap();
    extractor.extract(&root, dest.path()).await.unwrap();
    assert_extracted(dest.path(), &files);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_extract_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(FileStore::new(dir.path().join("blobs")).unwrap());
    let files = sample_files();
    let root = build_tree(store.clone(), &files).await;

    let dest = dir.path().join("out");
    let extractor = Extractor::new(store, ExtractConfig::default()).unwrap();
    extractor.extract(&root, &dest).await.unwrap();
    assert_extracted(&dest, &files);
}

#[cfg(unix)]
#[tokio::test]
#[ntest::timeout(20000)]
async fn test_extract_sets_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let root = build_tree(store.clone(), &sample_files()).await;
    let dest = tempfile::tempdir().unwrap();
    Extractor::new(store, tight_pipeline())
        .unwrap()
        .extract(&root, dest.path())
        .await
        .unwrap();

    let mode = |p: &str| {
        std::fs::metadata(dest.path().join(p))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    };
    assert_eq!(mode("bin/run.sh"), 0o755);
    assert_eq!(mode("top.txt"), 0o644);
    assert_eq!(mode("big/blob"), 0o444);
}

#[tokio::test]
#[ntest::timeout(30000)]
async fn test_rerun_is_idempotent() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let files = sample_files();
    let root = build_tree(store.clone(), &files).await;
    let dest = tempfile::tempdir().unwrap();
    let extractor = Extractor::new(store, tight_pipeline()).unwrap();

    extractor.extract(&root, dest.path()).await.unwrap();
    // Damage a file, including its length; a second run repairs it.
    std::fs::write(dest.path().join("a/b.txt"), b"garbage that is longer or shorter").unwrap();
    let again = extractor.extract(&root, dest.path()).await.unwrap();

    assert_eq!(again.files, files.len() as u64);
    assert_extracted(dest.path(), &files);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_extract_empty_tree() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let dest = tempfile::tempdir().unwrap();
    let target = dest.path().join("fresh");

    let summary = Extractor::new(store, ExtractConfig::default())
        .unwrap()
        .extract(&DirectoryNode::new(), &target)
        .await
        .unwrap();
    assert!(target.is_dir());
    assert_eq!(summary.files, 0);
    assert_eq!(summary.bytes, 0);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_missing_blob_fails_extraction() {
    let source: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let files = vec![("f.bin".to_string(), test_data(50_000), FileFlags::NONE)];
    let root = build_tree(source.clone(), &files).await;

    // Copy everything except one leaf into a second store.
    let entry = root.file_entry("f.bin").unwrap();
    let mut walker = cairn_cas::LeafWalker::new(source.clone(), entry.content);
    let (_, victim) = walker.next().await.unwrap().unwrap();
    let partial = Arc::new(MemoryStore::unbounded());
    for id in source.list().await.unwrap() {
        if id != victim.hash {
            let blob = source.get(id).await.unwrap().unwrap();
            partial.put(blob.blob_type, blob.data).await.unwrap();
        }
    }

    let dest = tempfile::tempdir().unwrap();
    let err = Extractor::new(partial, tight_pipeline())
        .unwrap()
        .extract(&root, dest.path())
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::Cas(ref e) if e.is_fetch_failure()),
        "got {err}"
    );
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_caller_cancellation_is_not_an_error() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let root = build_tree(store.clone(), &sample_files()).await;
    let dest = tempfile::tempdir().unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = Extractor::new(store, tight_pipeline())
        .unwrap()
        .extract_with_cancel(&root, dest.path(), cancel)
        .await
        .unwrap();
    assert!(summary.cancelled);
}

/// Cancels the caller's token from the final progress report, after every
/// stage has already finished.
struct CancelOnReport(CancellationToken);

impl ProgressSink for CancelOnReport {
    fn report(&self, _snapshot: &StatsSnapshot) {
        self.0.cancel();
    }
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_cancel_after_completion_is_not_reported() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let files = sample_files();
    let root = build_tree(store.clone(), &files).await;
    let dest = tempfile::tempdir().unwrap();

    // Long interval: the only report is the final one.
    let config = ExtractConfig {
        progress_interval_ms: 600_000,
        ..tight_pipeline()
    };
    let cancel = CancellationToken::new();
    let summary = Extractor::new(store, config)
        .unwrap()
        .with_progress(Arc::new(CancelOnReport(cancel.clone())))
        .extract_with_cancel(&root, dest.path(), cancel.clone())
        .await
        .unwrap();

    assert!(cancel.is_cancelled());
    assert!(!summary.cancelled, "{summary:?}");
    assert_eq!(summary.files, files.len() as u64);
    assert_extracted(dest.path(), &files);
}

#[tokio::test]
#[ntest::timeout(20000)]
async fn test_progress_sink_sees_final_totals() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let files = sample_files();
    let root = build_tree(store.clone(), &files).await;
    let dest = tempfile::tempdir().unwrap();

    let recorder = Arc::new(Recorder::default());
    let summary = Extractor::new(store, tight_pipeline())
        .unwrap()
        .with_progress(recorder.clone())
        .extract(&root, dest.path())
        .await
        .unwrap();

    let reports = recorder.0.lock().unwrap();
    let last = reports.last().expect("at least the final report");
    assert_eq!(last.bytes, summary.bytes);
    assert_eq!(last.files, summary.files);
}

#[test]
fn test_invalid_config_rejected() {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::unbounded());
    let config = ExtractConfig {
        fetch_workers: 0,
        ..ExtractConfig::default()
    };
    assert!(matches!(
        Extractor::new(store, config),
        Err(EngineError::InvalidConfig(_))
    ));
}
