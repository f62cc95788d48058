//! Bulk ingestion of many files through parallel writer lanes.
//!
//! Files are partitioned into lanes by byte volume, each lane chunks its
//! files through a forked [`ChunkedWriter`], and the per-lane overlays are
//! merged in lane order. Interior layers are left to the planner.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use cairn_cas::ChunkedWriter;
use cairn_store::BlobStore;
use cairn_types::{BlobId, ChunkingOptions, FileFlags, IngestConfig};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::apply::UpdatePlanner;
use crate::entry::DirectoryRef;
use crate::error::TreeError;
use crate::update::{DirectoryUpdate, FileUpdate};

/// Where an ingested file's bytes come from.
#[derive(Debug, Clone)]
pub enum IngestSource {
    /// A file on the local filesystem, streamed when its lane reaches it.
    Path(PathBuf),
    /// Bytes already in memory.
    Bytes(Bytes),
}

/// One file to ingest.
#[derive(Debug, Clone)]
pub struct IngestFile {
    /// Destination path inside the tree, `/`-separated.
    pub path: String,
    /// Content source.
    pub source: IngestSource,
    /// Flags stored on the entry.
    pub flags: FileFlags,
    /// Expected size, used for lane balancing.
    pub size: u64,
}

impl IngestFile {
    /// A file whose content is already in memory.
    pub fn from_bytes(path: impl Into<String>, data: Bytes, flags: FileFlags) -> Self {
        Self {
            path: path.into(),
            size: data.len() as u64,
            source: IngestSource::Bytes(data),
            flags,
        }
    }
}

/// Split `files` into `lanes` groups of roughly equal total size.
///
/// Largest files are placed first, each into the lane with the least volume
/// so far (lowest index on ties). Equal inputs always produce the same
/// partition. At least one lane is returned; lanes may be empty.
pub fn partition_by_volume(files: Vec<IngestFile>, lanes: usize) -> Vec<Vec<IngestFile>> {
    let lanes = lanes.max(1);
    let mut out: Vec<Vec<IngestFile>> = (0..lanes).map(|_| Vec::new()).collect();
    let mut load = vec![0u64; lanes];

    let mut files = files;
    files.sort_by(|a, b| b.size.cmp(&a.size));
    for file in files {
        let lane = (0..lanes).min_by_key(|&i| (load[i], i)).unwrap_or(0);
        load[lane] += file.size;
        out[lane].push(file);
    }
    out
}

/// Chunks files in parallel lanes and produces a single overlay.
pub struct Ingestor {
    store: Arc<dyn BlobStore>,
    opts: ChunkingOptions,
    config: IngestConfig,
}

impl Ingestor {
    /// Create an ingestor. Fails on invalid chunking options or zero lanes.
    pub fn new(
        store: Arc<dyn BlobStore>,
        opts: ChunkingOptions,
        config: IngestConfig,
    ) -> Result<Self, TreeError> {
        opts.validate().map_err(cairn_cas::CasError::InvalidOptions)?;
        if config.lanes == 0 {
            return Err(cairn_cas::CasError::InvalidOptions("lanes must be at least 1".into()).into());
        }
        Ok(Self { store, opts, config })
    }

    /// Chunk every file and return the overlay that adds them.
    ///
    /// Leaves are stored as lanes go; the first lane error aborts the rest.
    #[tracing::instrument(skip(self, files), fields(files = files.len()))]
    pub async fn ingest(&self, files: Vec<IngestFile>) -> Result<DirectoryUpdate, TreeError> {
        let total: u64 = files.iter().map(|f| f.size).sum();
        let template = ChunkedWriter::new(self.store.clone(), self.opts)?;
        let buf_size = self.config.read_buffer_size;

        let mut handles: Vec<JoinHandle<Result<DirectoryUpdate, TreeError>>> = Vec::new();
        for (lane, group) in partition_by_volume(files, self.config.lanes)
            .into_iter()
            .enumerate()
        {
            if group.is_empty() {
                continue;
            }
            let writer = template.fork();
            handles.push(tokio::spawn(run_lane(lane, writer, group, buf_size)));
        }

        let mut overlay = DirectoryUpdate::new();
        let mut pending = handles.into_iter();
        while let Some(handle) = pending.next() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(TreeError::Lane(e.to_string())),
            };
            match result {
                Ok(lane_overlay) => overlay.merge(lane_overlay),
                Err(e) => {
                    for rest in pending {
                        rest.abort();
                    }
                    return Err(e);
                }
            }
        }

        info!(files = overlay.file_count(), bytes = total, "ingest: complete");
        Ok(overlay)
    }

    /// Ingest `files` and apply them on top of `base` in one pass.
    pub async fn commit(
        &self,
        base: Option<BlobId>,
        files: Vec<IngestFile>,
    ) -> Result<DirectoryRef, TreeError> {
        let overlay = self.ingest(files).await?;
        UpdatePlanner::new(self.store.clone(), self.opts)
            .apply_root(base, &overlay)
            .await
    }
}

async fn run_lane(
    lane: usize,
    mut writer: ChunkedWriter,
    files: Vec<IngestFile>,
    buf_size: usize,
) -> Result<DirectoryUpdate, TreeError> {
    let mut overlay = DirectoryUpdate::new();
    for file in files {
        match &file.source {
            IngestSource::Bytes(data) => writer.append(data).await?,
            IngestSource::Path(source) => {
                let mut reader = tokio::fs::File::open(source).await?;
                writer.append_reader(&mut reader, buf_size).await?;
            }
        }
        let result = writer.complete().await?;
        debug!(lane, path = %file.path, length = result.length, "ingested file");
        overlay.add_file(&file.path, Some(FileUpdate::from_write(result, file.flags)))?;
    }
    Ok(overlay)
}

/// List every regular file below `root`, in file-name order, as ingestion
/// input. Symbolic links are skipped.
pub fn scan_directory(root: &Path) -> Result<Vec<IngestFile>, TreeError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = entry.map_err(|e| TreeError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata().map_err(|e| TreeError::Io(e.into()))?;
        let path = tree_path(root, entry.path())?;

        let mut flags = FileFlags::NONE;
        if is_executable(&meta) {
            flags.insert(FileFlags::EXECUTABLE);
        }
        if meta.permissions().readonly() {
            flags.insert(FileFlags::READ_ONLY);
        }

        files.push(IngestFile {
            path,
            source: IngestSource::Path(entry.path().to_path_buf()),
            flags,
            size: meta.len(),
        });
    }
    debug!(root = %root.display(), files = files.len(), "scanned directory");
    Ok(files)
}

/// `/`-joined path of `path` relative to `root`.
fn tree_path(root: &Path, path: &Path) -> Result<String, TreeError> {
    let rel = path.strip_prefix(root).map_err(|_| TreeError::InvalidPath {
        path: path.display().to_string(),
        reason: "outside the scanned root",
    })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            let part = part
                .to_str()
                .ok_or_else(|| TreeError::InvalidName(part.to_string_lossy().into_owned()))?;
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_cas::read_all;
    use cairn_store::MemoryStore;
    use cairn_types::StreamHash;

    use crate::node::DirectoryNode;

    fn opts() -> ChunkingOptions {
        ChunkingOptions {
            min_size: 64,
            target_size: 256,
            max_size: 1024,
            min_child_count: 2,
            target_child_count: 4,
            max_child_count: 8,
        }
    }

    fn test_data(size: usize, seed: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut state: u32 = 0xDEAD_BEEF ^ seed;
        for _ in 0..size {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            data.push((state >> 16) as u8);
        }
        data
    }

    fn sized(path: &str, size: u64) -> IngestFile {
        IngestFile {
            path: path.into(),
            source: IngestSource::Bytes(Bytes::new()),
            flags: FileFlags::NONE,
            size,
        }
    }

    #[test]
    fn test_partition_balances_volume_not_count() {
        let files = vec![
            sized("a", 10),
            sized("b", 100),
            sized("c", 40),
            sized("d", 60),
            sized("e", 50),
        ];
        let lanes = partition_by_volume(files, 2);

        let names: Vec<Vec<&str>> = lanes
            .iter()
            .map(|l| l.iter().map(|f| f.path.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["b", "c"], vec!["d", "e", "a"]]);

        let loads: Vec<u64> = lanes.iter().map(|l| l.iter().map(|f| f.size).sum()).collect();
        assert_eq!(loads, vec![140, 120]);
    }

    #[test]
    fn test_partition_edge_cases() {
        assert_eq!(partition_by_volume(vec![sized("x", 1)], 0).len(), 1);
        let lanes = partition_by_volume(vec![sized("x", 1)], 3);
        assert_eq!(lanes.len(), 3);
        assert_eq!(lanes[0].len(), 1);
        assert!(lanes[1].is_empty() && lanes[2].is_empty());
    }

    #[test]
    fn test_zero_lanes_rejected() {
        let store = Arc::new(MemoryStore::unbounded());
        let config = IngestConfig {
            lanes: 0,
            ..IngestConfig::default()
        };
        assert!(Ingestor::new(store, opts(), config).is_err());
    }

    #[tokio::test]
    async fn test_ingest_many_files_across_lanes() {
        let store = Arc::new(MemoryStore::unbounded());
        let config = IngestConfig {
            lanes: 3,
            ..IngestConfig::default()
        };
        let ingestor = Ingestor::new(store.clone(), opts(), config).unwrap();

        let mut expected = Vec::new();
        let mut files = Vec::new();
        for (i, size) in [0usize, 1, 500, 4_000, 20_000, 777].into_iter().enumerate() {
            let path = format!("dir{}/file{i}.bin", i % 2);
            let data = test_data(size, i as u32);
            files.push(IngestFile::from_bytes(&path, Bytes::from(data.clone()), FileFlags::NONE));
            expected.push((path, data));
        }

        let root_ref = ingestor.commit(None, files).await.unwrap();
        let root = DirectoryNode::load(store.as_ref(), root_ref.id).await.unwrap();

        for (path, data) in expected {
            let entry = root
                .file_entry_by_path(store.as_ref(), &path)
                .await
                .unwrap()
                .unwrap_or_else(|| panic!("{path} missing"));
            assert_eq!(entry.length, data.len() as u64);
            assert_eq!(entry.stream_hash, StreamHash::from_data(&data));
            let back = read_all(store.clone(), entry.content).await.unwrap();
            assert_eq!(back.as_ref(), &data[..], "{path}");
        }
    }

    #[tokio::test]
    async fn test_lane_count_does_not_change_root() {
        let make_files = || {
            (0..8)
                .map(|i| {
                    IngestFile::from_bytes(
                        format!("f{i}"),
                        Bytes::from(test_data(1_000 * (i + 1), i as u32)),
                        FileFlags::NONE,
                    )
                })
                .collect::<Vec<_>>()
        };

        let mut roots = Vec::new();
        for lanes in [1, 2, 5] {
            let store = Arc::new(MemoryStore::unbounded());
            let config = IngestConfig {
                lanes,
                ..IngestConfig::default()
            };
            let ingestor = Ingestor::new(store, opts(), config).unwrap();
            roots.push(ingestor.commit(None, make_files()).await.unwrap());
        }
        assert_eq!(roots[0], roots[1]);
        assert_eq!(roots[1], roots[2]);
    }

    #[tokio::test]
    async fn test_invalid_path_fails_ingest() {
        let store = Arc::new(MemoryStore::unbounded());
        let ingestor = Ingestor::new(store, opts(), IngestConfig::default()).unwrap();
        let files = vec![IngestFile::from_bytes("a/../b", Bytes::from_static(b"x"), FileFlags::NONE)];
        assert!(ingestor.ingest(files).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_and_ingest_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bee").unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), b"ay").unwrap();
        std::fs::write(dir.path().join("sub/deeper/empty"), b"").unwrap();
        std::fs::write(dir.path().join("run.sh"), b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let script = dir.path().join("run.sh");
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let files = scan_directory(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "run.sh", "sub/a.txt", "sub/deeper/empty"]);
        #[cfg(unix)]
        assert!(files[1].flags.contains(FileFlags::EXECUTABLE));
        assert!(!files[0].flags.contains(FileFlags::EXECUTABLE));

        let store = Arc::new(MemoryStore::unbounded());
        let ingestor = Ingestor::new(store.clone(), opts(), IngestConfig::default()).unwrap();
        let root_ref = ingestor.commit(None, files).await.unwrap();
        assert_eq!(root_ref.length, 3 + 10 + 2);

        let root = DirectoryNode::load(store.as_ref(), root_ref.id).await.unwrap();
        let empty = root
            .file_entry_by_path(store.as_ref(), "sub/deeper/empty")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(empty.length, 0);
    }
}
