//! Batch stage: group consecutive descriptors by storage locality.

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Batch, ChunkDescriptor};
use crate::error::EngineError;

/// Group descriptors sharing a locality key into batches of at most `limit`.
///
/// A batch is closed when the next descriptor has another key, when it is
/// full, or when no further descriptor is ready yet. Descriptors without a
/// key travel alone.
pub(crate) async fn batch(
    mut rx: mpsc::Receiver<ChunkDescriptor>,
    tx: mpsc::Sender<Batch>,
    limit: usize,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    let mut current: Vec<ChunkDescriptor> = Vec::new();
    loop {
        let next = if current.is_empty() {
            let received = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                d = rx.recv() => d,
            };
            match received {
                Some(d) => d,
                None => return Ok(()),
            }
        } else {
            match rx.try_recv() {
                Ok(d) => d,
                Err(TryRecvError::Empty) => {
                    if !forward(&tx, &mut current, &cancel).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    forward(&tx, &mut current, &cancel).await;
                    return Ok(());
                }
            }
        };

        let joins = next.locality.is_some()
            && current.first().is_some_and(|c| c.locality == next.locality);
        if !joins && !current.is_empty() && !forward(&tx, &mut current, &cancel).await {
            return Ok(());
        }
        let singleton = next.locality.is_none();
        current.push(next);
        if (singleton || current.len() >= limit) && !forward(&tx, &mut current, &cancel).await {
            return Ok(());
        }
    }
}

/// Send the pending batch. `false` once the run is over.
async fn forward(
    tx: &mpsc::Sender<Batch>,
    current: &mut Vec<ChunkDescriptor>,
    cancel: &CancellationToken,
) -> bool {
    if current.is_empty() {
        return true;
    }
    let batch = Batch {
        locality: current[0].locality,
        chunks: std::mem::take(current),
    };
    trace!(size = batch.chunks.len(), locality = ?batch.locality, "batch closed");
    tokio::select! {
        _ = cancel.cancelled() => false,
        res = tx.send(batch) => res.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_types::{ChunkRef, FileFlags};

    use super::*;
    use crate::extract::write::FileTarget;

    fn desc(target: &Arc<FileTarget>, offset: u64, locality: Option<u64>) -> ChunkDescriptor {
        ChunkDescriptor {
            target: target.clone(),
            offset,
            chunk: ChunkRef::leaf(&offset.to_le_bytes()),
            locality,
        }
    }

    async fn run(input: Vec<ChunkDescriptor>, limit: usize) -> Vec<Vec<u64>> {
        let (in_tx, in_rx) = mpsc::channel(input.len().max(1));
        for d in input {
            in_tx.send(d).await.unwrap();
        }
        drop(in_tx);

        let (out_tx, mut out_rx) = mpsc::channel(64);
        batch(in_rx, out_tx, limit, CancellationToken::new())
            .await
            .unwrap();

        let mut out = Vec::new();
        while let Some(b) = out_rx.recv().await {
            out.push(b.chunks.iter().map(|d| d.offset).collect());
        }
        out
    }

    fn target() -> Arc<FileTarget> {
        Arc::new(FileTarget::new("unused".into(), 0, FileFlags::NONE))
    }

    #[tokio::test]
    async fn test_groups_by_locality_key() {
        let t = target();
        let input = vec![
            desc(&t, 0, Some(1)),
            desc(&t, 1, Some(1)),
            desc(&t, 2, Some(2)),
            desc(&t, 3, Some(2)),
            desc(&t, 4, Some(1)),
        ];
        assert_eq!(run(input, 16).await, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let t = target();
        let input = (0..5).map(|i| desc(&t, i, Some(7))).collect();
        assert_eq!(run(input, 2).await, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn test_no_key_passes_through_alone() {
        let t = target();
        let input = vec![
            desc(&t, 0, None),
            desc(&t, 1, None),
            desc(&t, 2, Some(3)),
            desc(&t, 3, None),
        ];
        assert_eq!(run(input, 16).await, vec![vec![0], vec![1], vec![2], vec![3]]);
    }
}
