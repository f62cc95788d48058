//! A [`BlobStore`] wrapper that adds random IO latency and read faults.
//!
//! `ChaosStore` wraps any `Arc<dyn BlobStore>` and sleeps for a random
//! duration before each read or write operation. The RNG is seeded for
//! deterministic, reproducible behaviour across test runs. Reads of chosen
//! ids can be made to fail or to return corrupted payloads.
//!
//! # Example
//!
//! ```ignore
//! let chaos = ChaosStore::new(inner)
//!     .read_latency(5, 20)    // 5-20 ms per read
//!     .write_latency(10, 30)  // 10-30 ms per write
//!     .seed(42);
//! chaos.fail_reads_of(leaf_id);
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use cairn_types::{BlobId, BlobType};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::warn;

use crate::error::StoreError;
use crate::traits::{Blob, BlobStore};

/// A [`BlobStore`] wrapper that injects latency and faults.
///
/// Useful for chaos testing to surface race conditions, batch-drop and
/// cancellation paths that don't appear with an instant in-memory store.
pub struct ChaosStore {
    inner: Arc<dyn BlobStore>,
    read_latency_ms: (u64, u64),
    write_latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
    failing: Mutex<HashSet<BlobId>>,
    corrupting: Mutex<HashSet<BlobId>>,
}

impl ChaosStore {
    /// Wrap an existing store with zero latency (pass-through) by default.
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            read_latency_ms: (0, 0),
            write_latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            failing: Mutex::new(HashSet::new()),
            corrupting: Mutex::new(HashSet::new()),
        }
    }

    /// Set the read latency range in milliseconds (uniform random).
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the write latency range in milliseconds (uniform random).
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Make every subsequent read of `id` fail with [`StoreError::Unavailable`].
    pub fn fail_reads_of(&self, id: BlobId) {
        self.failing.lock().expect("lock poisoned").insert(id);
    }

    /// Make every subsequent read of `id` return a payload with one byte flipped.
    pub fn corrupt_reads_of(&self, id: BlobId) {
        self.corrupting.lock().expect("lock poisoned").insert(id);
    }

    /// Remove all injected faults.
    pub fn heal(&self) {
        self.failing.lock().expect("lock poisoned").clear();
        self.corrupting.lock().expect("lock poisoned").clear();
    }

    /// Sleep for a random duration in `[min, max]` milliseconds.
    async fn delay(&self, range: (u64, u64)) {
        let (min, max) = range;

        if max == 0 {
            return;
        }

        let ms = if min == max {
            min
        } else {
            self.rng
                .lock()
                .expect("lock poisoned")
                .random_range(min..=max)
        };

        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }

    fn inject(&self, id: BlobId, blob: Option<Blob>) -> Result<Option<Blob>, StoreError> {
        if self.failing.lock().expect("lock poisoned").contains(&id) {
            warn!(%id, "injected read failure");
            return Err(StoreError::Unavailable(format!(
                "injected read failure for {id}"
            )));
        }
        if !self.corrupting.lock().expect("lock poisoned").contains(&id) {
            return Ok(blob);
        }
        Ok(blob.map(|b| {
            let mut data = BytesMut::from(b.data.as_ref());
            match data.first_mut() {
                Some(byte) => *byte ^= 0xff,
                None => data.extend_from_slice(b"\0"),
            }
            Blob {
                blob_type: b.blob_type,
                data: data.freeze(),
            }
        }))
    }
}

#[async_trait::async_trait]
impl BlobStore for ChaosStore {
    async fn put(&self, blob_type: BlobType, data: Bytes) -> Result<BlobId, StoreError> {
        self.delay(self.write_latency_ms).await;
        self.inner.put(blob_type, data).await
    }

    async fn get(&self, id: BlobId) -> Result<Option<Blob>, StoreError> {
        self.delay(self.read_latency_ms).await;
        let blob = self.inner.get(id).await?;
        self.inject(id, blob)
    }

    async fn contains(&self, id: BlobId) -> Result<bool, StoreError> {
        self.delay(self.read_latency_ms).await;
        self.inner.contains(id).await
    }

    async fn list(&self) -> Result<Vec<BlobId>, StoreError> {
        self.inner.list().await
    }

    async fn locality(&self, id: BlobId) -> Result<Option<u64>, StoreError> {
        self.inner.locality(id).await
    }

    async fn get_many(&self, ids: &[BlobId]) -> Result<Vec<Option<Blob>>, StoreError> {
        self.delay(self.read_latency_ms).await;
        let blobs = self.inner.get_many(ids).await?;
        ids.iter()
            .zip(blobs)
            .map(|(id, blob)| self.inject(*id, blob))
            .collect()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.delay(self.write_latency_ms).await;
        self.inner.flush().await
    }
}
