//! Error types for blob storage operations.

use cairn_types::BlobId;

/// Errors that can occur during blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has reached its capacity limit.
    #[error("store capacity exceeded: need {needed} bytes, only {available} available")]
    CapacityExceeded {
        /// Bytes needed for the operation.
        needed: u64,
        /// Bytes currently available.
        available: u64,
    },

    /// Blob data on disk does not match its content-addressed ID.
    #[error("blob corruption detected: expected {expected}, actual hash {actual}")]
    Corrupt {
        /// The ID that was requested.
        expected: BlobId,
        /// The ID computed from the data actually stored.
        actual: BlobId,
    },

    /// The backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored blob carries a type tag this build does not understand.
    #[error("unknown blob type tag: {0}")]
    UnknownBlobType(u8),
}
