//! Walk stage: depth-first traversal emitting one descriptor per leaf.

use std::path::PathBuf;
use std::sync::Arc;

use cairn_cas::LeafWalker;
use cairn_store::BlobStore;
use cairn_tree::DirectoryNode;
use cairn_types::BlobId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChunkDescriptor, Completion};
use super::write::FileTarget;
use crate::error::EngineError;
use crate::progress::Stats;

/// Walk `root`, creating directories under `dest` and sending a descriptor
/// for every leaf of every file, in byte order within each file.
///
/// Returns early without error when the run is cancelled or downstream
/// stages have gone away. Only a walk that reaches the end marks
/// `completion` as walked.
pub(crate) async fn walk(
    store: Arc<dyn BlobStore>,
    root: DirectoryNode,
    dest: PathBuf,
    tx: mpsc::Sender<ChunkDescriptor>,
    stats: Arc<Stats>,
    completion: Arc<Completion>,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    let result = walk_inner(store, root, dest, tx, &stats, &completion, &cancel).await;
    if result.is_err() {
        cancel.cancel();
    }
    result
}

async fn walk_inner(
    store: Arc<dyn BlobStore>,
    root: DirectoryNode,
    dest: PathBuf,
    tx: mpsc::Sender<ChunkDescriptor>,
    stats: &Stats,
    completion: &Completion,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    // Subdirectories are loaded when popped, not when their parent is read.
    let mut root = Some(root);
    let mut stack: Vec<(Option<BlobId>, PathBuf)> = vec![(None, dest)];
    while let Some((id, dir)) = stack.pop() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let node = match id {
            Some(id) => DirectoryNode::load(store.as_ref(), id).await?,
            None => root.take().unwrap_or_default(),
        };
        tokio::fs::create_dir_all(&dir).await?;
        stats.add_directory();

        for file in node.files() {
            let target = Arc::new(FileTarget::new(
                dir.join(&file.name),
                file.length,
                file.flags,
            ));
            let mut leaves = LeafWalker::new(store.clone(), file.content);
            while let Some((offset, chunk)) = leaves.next().await? {
                let locality = store.locality(chunk.hash).await?;
                target.add_pending();
                let desc = ChunkDescriptor {
                    target: target.clone(),
                    offset,
                    chunk,
                    locality,
                };
                let sent = tokio::select! {
                    _ = cancel.cancelled() => false,
                    res = tx.send(desc) => res.is_ok(),
                };
                if !sent {
                    return Ok(());
                }
                completion.add_queued();
            }
            if target.release().await? {
                stats.add_file();
            }
        }

        // Reverse so subdirectories are visited in ascending name order.
        stack.extend(
            node.directories()
                .rev()
                .map(|entry| (Some(entry.child), dir.join(&entry.name))),
        );
    }
    completion.mark_walked();
    debug!("walk complete");
    Ok(())
}
