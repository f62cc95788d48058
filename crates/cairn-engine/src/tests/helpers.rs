//! Shared test utilities for cairn-engine tests.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use cairn_store::{BlobStore, MemoryStore};
use cairn_tree::{DirectoryNode, IngestFile, Ingestor};
use cairn_types::{ChunkingOptions, ExtractConfig, FileFlags, IngestConfig};

/// Small chunk sizes so modest files span many leaves and interior layers.
pub fn small_chunks() -> ChunkingOptions {
    ChunkingOptions {
        min_size: 256,
        target_size: 1024,
        max_size: 4096,
        min_child_count: 2,
        target_child_count: 4,
        max_child_count: 8,
    }
}

/// Pipeline sizing that forces queues to fill up.
pub fn tight_pipeline() -> ExtractConfig {
    ExtractConfig {
        fetch_workers: 3,
        write_workers: 2,
        queue_depth: 2,
        batch_limit: 4,
        progress_interval_ms: 20,
        throughput_window: 3,
    }
}

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    seeded_data(size, 0)
}

/// Deterministic data whose content also depends on `seed`.
pub fn seeded_data(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF ^ seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Files used by most tests: mixed sizes, nesting, one empty file and one
/// executable.
pub fn sample_files() -> Vec<(String, Vec<u8>, FileFlags)> {
    vec![
        ("top.txt".into(), b"top level".to_vec(), FileFlags::TEXT),
        ("empty".into(), Vec::new(), FileFlags::NONE),
        ("a/b.txt".into(), seeded_data(3_000, 1), FileFlags::NONE),
        ("a/c/d.txt".into(), seeded_data(70_000, 2), FileFlags::NONE),
        ("a/c/e.bin".into(), seeded_data(1, 3), FileFlags::NONE),
        ("bin/run.sh".into(), b"#!/bin/sh\necho hi\n".to_vec(), FileFlags::EXECUTABLE),
        ("big/blob".into(), seeded_data(400_000, 4), FileFlags::READ_ONLY),
    ]
}

/// Ingest `files` into `store` and return the loaded root node.
pub async fn build_tree(
    store: Arc<dyn BlobStore>,
    files: &[(String, Vec<u8>, FileFlags)],
) -> DirectoryNode {
    let ingestor = Ingestor::new(
        store.clone(),
        small_chunks(),
        IngestConfig {
            lanes: 3,
            ..IngestConfig::default()
        },
    )
    .unwrap();
    let input = files
        .iter()
        .map(|(path, data, flags)| IngestFile::from_bytes(path, Bytes::from(data.clone()), *flags))
        .collect();
    let root = ingestor.commit(None, input).await.unwrap();
    DirectoryNode::load(store.as_ref(), root.id).await.unwrap()
}

/// A store grouping every 8 blobs into one locality segment.
pub fn segmented_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::unbounded().with_segment_size(8))
}

/// Assert every file in `files` exists under `dest` with identical bytes.
pub fn assert_extracted(dest: &Path, files: &[(String, Vec<u8>, FileFlags)]) {
    for (path, data, _) in files {
        let on_disk = std::fs::read(dest.join(path))
            .unwrap_or_else(|e| panic!("{path}: {e}"));
        assert_eq!(on_disk.len(), data.len(), "{path} length");
        assert!(on_disk == *data, "{path} content differs");
    }
}
