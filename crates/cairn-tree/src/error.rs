//! Error types for directory tree operations.

use cairn_cas::CasError;
use cairn_store::StoreError;

/// Errors that can occur while building, reading or updating directory trees.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Chunk-tree or blob verification failed.
    #[error(transparent)]
    Cas(#[from] CasError),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error occurred while reading ingestion sources.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A directory blob could not be decoded.
    #[error("format error: {0}")]
    Format(String),

    /// A name is already used by the other namespace of the same directory.
    #[error("name collision: {name:?} already exists as a {existing}")]
    NameCollision {
        /// The contested name.
        name: String,
        /// `"file"` or `"directory"`.
        existing: &'static str,
    },

    /// A name is empty or contains a path separator.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// A path cannot be placed in the overlay.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A file entry is internally inconsistent.
    #[error("invalid entry {name:?}: {reason}")]
    InvalidEntry {
        /// The file name.
        name: String,
        /// What is inconsistent.
        reason: String,
    },

    /// An ingestion lane task failed to complete.
    #[error("ingestion lane failed: {0}")]
    Lane(String),
}
