//! Blob storage trait and backend implementations.
//!
//! This crate defines the [`BlobStore`] trait, the external capability the
//! chunking and directory layers write typed blobs into, along with three
//! backends:
//!
//! - [`MemoryStore`]: in-memory storage backed by a `RwLock<HashMap>`, with
//!   optional locality segments.
//! - [`FileStore`]: one file per blob with a 2-level fan-out directory layout.
//! - [`ChaosStore`]: wrapper injecting seeded latency and read faults.

mod chaos_store;
mod error;
mod file_store;
mod memory_store;
mod traits;

pub use chaos_store::ChaosStore;
pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use traits::{Blob, BlobStore};
