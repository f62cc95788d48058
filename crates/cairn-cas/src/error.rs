//! Error types for content addressing operations.

use cairn_store::StoreError;
use cairn_types::{BlobId, BlobType};

/// Errors that can occur during CAS operations.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error occurred during streaming.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A referenced blob is not in the store.
    #[error("failed to fetch blob {0}: not found")]
    Fetch(BlobId),

    /// Fetched bytes do not match the reference that pointed at them.
    #[error("integrity mismatch for {id}: {reason}")]
    Integrity {
        /// The referenced blob.
        id: BlobId,
        /// What did not match.
        reason: String,
    },

    /// A blob could not be decoded.
    #[error("format error: {0}")]
    Format(String),

    /// A blob carries a different type tag than its reference implies.
    #[error("unexpected blob type for {id}: expected {expected}, found {found}")]
    UnexpectedType {
        /// The referenced blob.
        id: BlobId,
        /// Type implied by the reference.
        expected: BlobType,
        /// Type recorded by the store.
        found: BlobType,
    },

    /// Chunking options violate their ordering constraints.
    #[error("invalid chunking options: {0}")]
    InvalidOptions(String),
}

impl CasError {
    /// Whether the error means the store could not serve a blob, as opposed
    /// to serving one that is wrong.
    pub fn is_fetch_failure(&self) -> bool {
        match self {
            CasError::Fetch(_) => true,
            CasError::Store(e) => !matches!(e, StoreError::Corrupt { .. }),
            _ => false,
        }
    }
}
