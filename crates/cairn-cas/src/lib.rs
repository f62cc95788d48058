//! Content addressing, chunking, and chunk-tree building.
//!
//! This crate provides:
//! - [`Chunker`]: splits a byte stream into content-defined chunks with a
//!   rolling hash; boundaries do not depend on how the input is split across
//!   calls.
//! - [`build_tree`]: groups leaf references into a Merkle-style tree of
//!   [`InteriorNode`]s, cutting layers on a slice of each child's hash.
//! - [`ChunkedWriter`]: streaming writer that flushes leaves to a
//!   [`BlobStore`](cairn_store::BlobStore) as soon as they are cut.
//! - [`LeafWalker`], [`ChunkReader`], [`read_all`] and
//!   [`open_content_stream`]: depth-first readers with bounded memory.
//! - [`PipeReader`]: producer/consumer pipe used for streamed exports.

mod chunker;
mod error;
mod pipe;
mod reader;
mod rolling;
mod tree;
mod writer;

pub use chunker::Chunker;
pub use error::CasError;
pub use pipe::PipeReader;
pub use reader::{
    ChunkReader, LeafWalker, check_leaf, check_node, fetch_node, open_content_stream, read_all,
};
pub use rolling::RollingHash;
pub use tree::{InteriorNode, LeafNode, Node, build_tree, split_layer};
pub use writer::{ChunkedWriter, WriteResult, concat_leaves, write_bytes};
