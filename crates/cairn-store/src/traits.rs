//! Core trait and types for blob storage.

use bytes::Bytes;
use cairn_types::{BlobId, BlobType};

use crate::error::StoreError;

/// A typed blob as returned by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Type tag recorded at write time.
    pub blob_type: BlobType,
    /// Raw payload.
    pub data: Bytes,
}

impl Blob {
    /// Recompute the content-addressed id of this blob.
    pub fn id(&self) -> BlobId {
        BlobId::for_blob(self.blob_type, &self.data)
    }
}

/// Trait for storing and retrieving immutable, typed, content-addressed blobs.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Writing the same `(type, payload)` twice returns the same id and stores
/// it once.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob and return its id.
    async fn put(&self, blob_type: BlobType, data: Bytes) -> Result<BlobId, StoreError>;

    /// Retrieve a blob by ID. Returns `None` if not found.
    async fn get(&self, id: BlobId) -> Result<Option<Blob>, StoreError>;

    /// Check whether a blob exists.
    async fn contains(&self, id: BlobId) -> Result<bool, StoreError>;

    /// List all stored blob IDs.
    async fn list(&self) -> Result<Vec<BlobId>, StoreError>;

    /// Storage-locality key of a blob, if the backend groups blobs physically.
    ///
    /// Blobs sharing a key are cheaper to fetch together.
    async fn locality(&self, _id: BlobId) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }

    /// Retrieve several blobs, preserving order.
    async fn get_many(&self, ids: &[BlobId]) -> Result<Vec<Option<Blob>>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.get(*id).await?);
        }
        Ok(out)
    }

    /// Make every completed `put` durable.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
