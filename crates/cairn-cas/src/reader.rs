//! Depth-first chunk-tree readers.
//!
//! Nothing here materializes a whole tree: [`LeafWalker`] keeps one child
//! iterator per level, and [`ChunkReader`] keeps at most `read_ahead` leaf
//! fetches in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use cairn_store::{Blob, BlobStore};
use cairn_types::{BlobId, ChunkKind, ChunkRef};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::CasError;
use crate::pipe::PipeReader;
use crate::tree::{InteriorNode, LeafNode, Node};

/// Pipe buffer used by [`open_content_stream`].
const CONTENT_PIPE_CAPACITY: usize = 256 * 1024;

/// Fetch and verify the node a reference points at.
///
/// Checks the stored type tag, the content hash and the logical length.
/// A zero-length leaf resolves without touching the store.
pub async fn fetch_node(store: &dyn BlobStore, r: &ChunkRef) -> Result<Node, CasError> {
    if r.is_leaf() && r.length == 0 {
        return Ok(Node::Leaf(LeafNode { data: Bytes::new() }));
    }
    let blob = store.get(r.hash).await?;
    check_node(r, blob)
}

/// Verify a blob fetched for `r` and decode it.
///
/// `None` (the store had no such blob) is a fetch failure.
pub fn check_node(r: &ChunkRef, blob: Option<Blob>) -> Result<Node, CasError> {
    if r.is_leaf() && r.length == 0 {
        return Ok(Node::Leaf(LeafNode { data: Bytes::new() }));
    }
    let blob = blob.ok_or(CasError::Fetch(r.hash))?;
    let expected = r.kind.blob_type();
    if blob.blob_type != expected {
        return Err(CasError::UnexpectedType {
            id: r.hash,
            expected,
            found: blob.blob_type,
        });
    }

    let actual = blob.id();
    if actual != r.hash {
        return Err(integrity(r.hash, format!("content hashes to {actual}")));
    }

    let node = match r.kind {
        ChunkKind::Leaf => Node::Leaf(LeafNode { data: blob.data }),
        ChunkKind::Interior(h) => Node::Interior(InteriorNode::decode(h, &blob.data)?),
    };
    let length = match &node {
        Node::Leaf(leaf) => leaf.data.len() as u64,
        Node::Interior(interior) => interior.length()?,
    };
    if length != r.length {
        return Err(integrity(
            r.hash,
            format!("length {length}, reference says {}", r.length),
        ));
    }
    Ok(node)
}

/// Verify a blob fetched for the leaf reference `r` and return its payload.
pub fn check_leaf(r: &ChunkRef, blob: Option<Blob>) -> Result<Bytes, CasError> {
    match check_node(r, blob)? {
        Node::Leaf(leaf) => Ok(leaf.data),
        Node::Interior(_) => Err(CasError::Format(format!("{} is not a leaf", r.hash))),
    }
}

/// Fetch a leaf's payload.
pub(crate) async fn fetch_leaf(store: &dyn BlobStore, r: &ChunkRef) -> Result<Bytes, CasError> {
    match fetch_node(store, r).await? {
        Node::Leaf(leaf) => Ok(leaf.data),
        Node::Interior(_) => Err(CasError::Format(format!("{} is not a leaf", r.hash))),
    }
}

fn integrity(id: BlobId, reason: String) -> CasError {
    CasError::Integrity { id, reason }
}

// ---------------------------------------------------------------------------
// LeafWalker
// ---------------------------------------------------------------------------

/// Yields the leaves under a root in stream order, with their byte offsets.
///
/// Interior nodes are fetched lazily as the walk descends. Zero-length leaves
/// are skipped.
pub struct LeafWalker {
    store: Arc<dyn BlobStore>,
    stack: Vec<std::vec::IntoIter<ChunkRef>>,
    offset: u64,
}

impl LeafWalker {
    /// Start a walk at `root`.
    pub fn new(store: Arc<dyn BlobStore>, root: ChunkRef) -> Self {
        let stack = if root.length == 0 {
            Vec::new()
        } else {
            vec![vec![root].into_iter()]
        };
        Self {
            store,
            stack,
            offset: 0,
        }
    }

    /// The next `(offset, leaf)` pair, or `None` once the tree is exhausted.
    pub async fn next(&mut self) -> Result<Option<(u64, ChunkRef)>, CasError> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some(r) = top.next() else {
                self.stack.pop();
                continue;
            };

            if r.is_leaf() {
                if r.length == 0 {
                    continue;
                }
                let offset = self.offset;
                self.offset += r.length;
                return Ok(Some((offset, r)));
            }

            match fetch_node(self.store.as_ref(), &r).await? {
                Node::Interior(node) => self.stack.push(node.children.into_iter()),
                Node::Leaf(_) => {
                    return Err(CasError::Format(format!("{} decoded as a leaf", r.hash)));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Streams leaf payloads in order, fetching up to `read_ahead` leaves concurrently.
pub struct ChunkReader {
    store: Arc<dyn BlobStore>,
    walker: LeafWalker,
    inflight: VecDeque<JoinHandle<Result<Bytes, CasError>>>,
    read_ahead: usize,
    walked: bool,
}

impl ChunkReader {
    /// Read the stream under `root`.
    pub fn new(store: Arc<dyn BlobStore>, root: ChunkRef, read_ahead: usize) -> Self {
        Self {
            walker: LeafWalker::new(store.clone(), root),
            store,
            inflight: VecDeque::new(),
            read_ahead: read_ahead.max(1),
            walked: false,
        }
    }

    /// The next leaf payload, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, CasError> {
        while !self.walked && self.inflight.len() < self.read_ahead {
            match self.walker.next().await? {
                Some((_, leaf)) => {
                    let store = self.store.clone();
                    self.inflight
                        .push_back(tokio::spawn(
                            async move { fetch_leaf(store.as_ref(), &leaf).await },
                        ));
                }
                None => self.walked = true,
            }
        }

        let Some(handle) = self.inflight.pop_front() else {
            return Ok(None);
        };
        let data = handle
            .await
            .map_err(|e| CasError::Io(std::io::Error::other(e)))??;
        Ok(Some(data))
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        for handle in &self.inflight {
            handle.abort();
        }
    }
}

/// Read a whole stream into memory.
pub async fn read_all(store: Arc<dyn BlobStore>, root: ChunkRef) -> Result<Bytes, CasError> {
    let mut out = BytesMut::with_capacity(root.length as usize);
    let mut walker = LeafWalker::new(store.clone(), root);
    while let Some((_, leaf)) = walker.next().await? {
        out.extend_from_slice(&fetch_leaf(store.as_ref(), &leaf).await?);
    }
    Ok(out.freeze())
}

/// Expose the stream under `root` as an `AsyncRead`.
///
/// A background task fills a bounded pipe; errors it hits are returned by
/// the next read once the buffered bytes are drained.
pub fn open_content_stream(
    store: Arc<dyn BlobStore>,
    root: ChunkRef,
    read_ahead: usize,
) -> PipeReader {
    PipeReader::spawn(CONTENT_PIPE_CAPACITY, move |mut pipe, _cancel| async move {
        let mut reader = ChunkReader::new(store, root, read_ahead);
        let mut written = 0u64;
        while let Some(chunk) = reader.next_chunk().await? {
            pipe.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        pipe.shutdown().await?;
        debug!(root = %root.hash, written, "content stream complete");
        Ok::<(), CasError>(())
    })
}
