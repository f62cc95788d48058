//! Streaming chunked writer.
//!
//! Bytes go through the [`Chunker`]; each completed leaf is written to the
//! store immediately, so a writer buffers at most one chunk. Interior layers
//! are not built here: callers pass the leaf list to [`build_tree`] when the
//! stream is final, which lets many small streams be chunked in parallel
//! without building trees that may be discarded.

use std::sync::Arc;

use bytes::Bytes;
use cairn_store::BlobStore;
use cairn_types::{BlobType, ChunkKind, ChunkRef, ChunkingOptions, StreamHash};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::chunker::Chunker;
use crate::error::CasError;
use crate::tree::build_tree;

/// Outcome of one completed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// `blake3` of the whole stream, independent of chunk boundaries.
    pub stream_hash: StreamHash,
    /// Total bytes written.
    pub length: u64,
    /// Leaf references in stream order. Empty for an empty stream.
    pub leaves: Vec<ChunkRef>,
}

/// Incremental writer turning a byte stream into stored leaves.
///
/// Not shareable between tasks; use [`ChunkedWriter::fork`] for parallel lanes.
pub struct ChunkedWriter {
    store: Arc<dyn BlobStore>,
    chunker: Chunker,
    hasher: blake3::Hasher,
    length: u64,
    leaves: Vec<ChunkRef>,
}

impl ChunkedWriter {
    /// Create a writer flushing leaves into `store`.
    pub fn new(store: Arc<dyn BlobStore>, opts: ChunkingOptions) -> Result<Self, CasError> {
        Ok(Self {
            store,
            chunker: Chunker::new(opts)?,
            hasher: blake3::Hasher::new(),
            length: 0,
            leaves: Vec::new(),
        })
    }

    /// A fresh writer over the same store and options.
    pub fn fork(&self) -> Self {
        Self {
            store: self.store.clone(),
            chunker: self.chunker.fresh(),
            hasher: blake3::Hasher::new(),
            length: 0,
            leaves: Vec::new(),
        }
    }

    /// The chunking options in use.
    pub fn options(&self) -> &ChunkingOptions {
        self.chunker.options()
    }

    /// The store leaves are flushed to.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Feed bytes, flushing every leaf the chunker completes.
    pub async fn append(&mut self, data: &[u8]) -> Result<(), CasError> {
        self.hasher.update(data);
        self.length += data.len() as u64;

        let mut input = data;
        while let Some(chunk) = self.chunker.next_chunk(&mut input) {
            self.flush_leaf(chunk).await?;
        }
        Ok(())
    }

    /// Feed everything `reader` yields, `buf_size` bytes at a time.
    pub async fn append_reader<R>(&mut self, reader: &mut R, buf_size: usize) -> Result<u64, CasError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; buf_size.max(1)];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.append(&buf[..n]).await?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Flush the trailing partial leaf and return the stream summary.
    ///
    /// The writer is reset and can be reused for another stream.
    pub async fn complete(&mut self) -> Result<WriteResult, CasError> {
        if let Some(chunk) = self.chunker.finish() {
            self.flush_leaf(chunk).await?;
        }

        let result = WriteResult {
            stream_hash: StreamHash::from_hasher(&self.hasher),
            length: self.length,
            leaves: std::mem::take(&mut self.leaves),
        };
        self.hasher.reset();
        self.length = 0;

        debug!(
            stream = %result.stream_hash,
            length = result.length,
            leaves = result.leaves.len(),
            "stream complete"
        );
        Ok(result)
    }

    async fn flush_leaf(&mut self, chunk: Bytes) -> Result<(), CasError> {
        let length = chunk.len() as u64;
        let hash = self.store.put(BlobType::Leaf, chunk).await?;
        self.leaves.push(ChunkRef {
            hash,
            length,
            kind: ChunkKind::Leaf,
        });
        Ok(())
    }
}

/// Concatenate the leaf lists of forked lanes, in lane order.
///
/// The result is one leaf sequence ready for [`build_tree`].
pub fn concat_leaves<I>(lanes: I) -> Vec<ChunkRef>
where
    I: IntoIterator<Item = Vec<ChunkRef>>,
{
    lanes.into_iter().flatten().collect()
}

/// Write a complete buffer and build its tree.
pub async fn write_bytes(
    store: Arc<dyn BlobStore>,
    opts: ChunkingOptions,
    data: &[u8],
) -> Result<(WriteResult, ChunkRef), CasError> {
    let mut writer = ChunkedWriter::new(store.clone(), opts)?;
    writer.append(data).await?;
    let result = writer.complete().await?;
    let root = build_tree(store.as_ref(), &result.leaves, &opts).await?;
    Ok((result, root))
}
