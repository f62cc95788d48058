//! Error types for the engine.

/// Errors that can occur during extraction or export.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Chunk-tree fetch or verification failed.
    #[error("cas error: {0}")]
    Cas(#[from] cairn_cas::CasError),

    /// Directory tree error.
    #[error("tree error: {0}")]
    Tree(#[from] cairn_tree::TreeError),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] cairn_store::StoreError),

    /// A destination file or directory could not be written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The consumer of a stream went away before the producer finished.
    #[error("operation cancelled")]
    Cancelled,

    /// Pipeline sizing is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline task panicked or was aborted.
    #[error("pipeline task failed: {0}")]
    Join(String),
}
