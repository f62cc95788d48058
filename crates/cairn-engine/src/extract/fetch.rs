//! Fetch stage: resolve each batch's leaf payloads from the store.

use std::sync::Arc;

use cairn_cas::{CasError, check_leaf};
use cairn_store::BlobStore;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Batch, FetchedBatch};
use crate::error::EngineError;

/// Fetch worker: one `get_many` per batch, every payload verified against
/// its reference.
///
/// A failure anywhere in a batch drops the whole batch, cancels the run and
/// is returned; nothing from that batch reaches the write stage.
pub(crate) async fn fetch_worker(
    worker: usize,
    store: Arc<dyn BlobStore>,
    rx: Arc<Mutex<mpsc::Receiver<Batch>>>,
    tx: mpsc::Sender<FetchedBatch>,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                batch = rx.recv() => batch,
            }
        };
        let Some(batch) = next else {
            return Ok(());
        };

        let fetched = match fetch_batch(store.as_ref(), batch).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(worker, error = %e, "fetch failed; dropping batch and cancelling");
                cancel.cancel();
                return Err(e.into());
            }
        };
        debug!(worker, chunks = fetched.chunks.len(), "batch fetched");

        let sent = tokio::select! {
            _ = cancel.cancelled() => false,
            res = tx.send(fetched) => res.is_ok(),
        };
        if !sent {
            return Ok(());
        }
    }
}

async fn fetch_batch(store: &dyn BlobStore, batch: Batch) -> Result<FetchedBatch, CasError> {
    let ids: Vec<_> = batch.chunks.iter().map(|d| d.chunk.hash).collect();
    let blobs = store.get_many(&ids).await?;
    if blobs.len() != ids.len() {
        return Err(CasError::Format(format!(
            "store returned {} blobs for {} ids",
            blobs.len(),
            ids.len()
        )));
    }

    let mut chunks = Vec::with_capacity(ids.len());
    for (desc, blob) in batch.chunks.into_iter().zip(blobs) {
        let data = check_leaf(&desc.chunk, blob)?;
        chunks.push((desc, data));
    }
    Ok(FetchedBatch { chunks })
}
