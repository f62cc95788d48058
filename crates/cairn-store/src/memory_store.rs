//! In-memory blob storage backend.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use cairn_types::{BlobId, BlobType};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{Blob, BlobStore};

struct Entry {
    blob_type: BlobType,
    data: Bytes,
    segment: u64,
}

#[derive(Default)]
struct Blobs {
    map: HashMap<BlobId, Entry>,
    used_bytes: u64,
    writes: u64,
}

/// In-memory blob store backed by a `RwLock<HashMap>`.
///
/// Tracks total bytes stored against a configurable maximum. When built with
/// [`MemoryStore::with_segment_size`], every `n` consecutive new blobs share
/// one locality segment, the way blobs appended to one pack file would.
pub struct MemoryStore {
    blobs: RwLock<Blobs>,
    max_bytes: u64,
    segment_size: Option<u64>,
}

impl MemoryStore {
    /// Create a new in-memory store with the given capacity limit.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            blobs: RwLock::new(Blobs::default()),
            max_bytes,
            segment_size: None,
        }
    }

    /// Create a store with no practical capacity limit.
    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }

    /// Group every `blobs_per_segment` new blobs into one locality segment.
    pub fn with_segment_size(mut self, blobs_per_segment: u64) -> Self {
        self.segment_size = Some(blobs_per_segment.max(1));
        self
    }

    /// Number of distinct blobs held.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").map.len()
    }

    /// Whether the store holds no blob.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes held.
    pub fn used_bytes(&self) -> u64 {
        self.blobs.read().expect("lock poisoned").used_bytes
    }

    /// Overwrite a stored payload in place (for testing purposes).
    #[cfg(test)]
    pub(crate) fn tamper(&self, id: BlobId, data: &'static [u8]) {
        let mut blobs = self.blobs.write().expect("lock poisoned");
        if let Some(entry) = blobs.map.get_mut(&id) {
            entry.data = Bytes::from_static(data);
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, blob_type: BlobType, data: Bytes) -> Result<BlobId, StoreError> {
        let id = BlobId::for_blob(blob_type, &data);
        let mut blobs = self.blobs.write().expect("lock poisoned");

        if blobs.map.contains_key(&id) {
            debug!(%id, "blob already present");
            return Ok(id);
        }

        let data_len = data.len() as u64;
        if blobs.used_bytes.saturating_add(data_len) > self.max_bytes {
            return Err(StoreError::CapacityExceeded {
                needed: data_len,
                available: self.max_bytes.saturating_sub(blobs.used_bytes),
            });
        }

        let segment = match self.segment_size {
            Some(n) => blobs.writes / n,
            None => blobs.writes,
        };
        blobs.writes += 1;
        blobs.used_bytes += data_len;

        debug!(%id, %blob_type, size = data.len(), segment, "storing blob in memory");
        blobs.map.insert(
            id,
            Entry {
                blob_type,
                data,
                segment,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: BlobId) -> Result<Option<Blob>, StoreError> {
        let blobs = self.blobs.read().expect("lock poisoned");
        Ok(blobs.map.get(&id).map(|e| Blob {
            blob_type: e.blob_type,
            data: e.data.clone(),
        }))
    }

    async fn contains(&self, id: BlobId) -> Result<bool, StoreError> {
        let blobs = self.blobs.read().expect("lock poisoned");
        Ok(blobs.map.contains_key(&id))
    }

    async fn list(&self) -> Result<Vec<BlobId>, StoreError> {
        let blobs = self.blobs.read().expect("lock poisoned");
        Ok(blobs.map.keys().copied().collect())
    }

    async fn locality(&self, id: BlobId) -> Result<Option<u64>, StoreError> {
        if self.segment_size.is_none() {
            return Ok(None);
        }
        let blobs = self.blobs.read().expect("lock poisoned");
        Ok(blobs.map.get(&id).map(|e| e.segment))
    }

    async fn get_many(&self, ids: &[BlobId]) -> Result<Vec<Option<Blob>>, StoreError> {
        let blobs = self.blobs.read().expect("lock poisoned");
        Ok(ids
            .iter()
            .map(|id| {
                blobs.map.get(id).map(|e| Blob {
                    blob_type: e.blob_type,
                    data: e.data.clone(),
                })
            })
            .collect())
    }
}
