//! Rewriting a directory tree through an overlay.

use std::collections::HashMap;
use std::sync::Arc;

use cairn_cas::build_tree;
use cairn_store::BlobStore;
use cairn_types::{BlobId, ChunkRef, ChunkingOptions};
use tracing::{debug, info};

use crate::entry::{DirectoryEntry, DirectoryRef, FileEntry};
use crate::error::TreeError;
use crate::node::DirectoryNode;
use crate::update::{DirectoryUpdate, FileContent, FileUpdate};

/// Applies [`DirectoryUpdate`] overlays to persisted trees.
///
/// Only directories the overlay touches are rewritten; every other subtree
/// keeps its blob and is referenced from the new parents as-is.
pub struct UpdatePlanner {
    store: Arc<dyn BlobStore>,
    opts: ChunkingOptions,
}

impl UpdatePlanner {
    /// Create a planner writing into `store`. `opts` drives deferred
    /// interior-layer construction for files delivered as leaf lists.
    pub fn new(store: Arc<dyn BlobStore>, opts: ChunkingOptions) -> Self {
        Self { store, opts }
    }

    /// Apply `overlay` to `base` and return the new root node.
    ///
    /// Every rewritten subdirectory is persisted; the returned root is not,
    /// so callers can inspect it or keep editing before [`DirectoryNode::persist`].
    /// The same base and overlay always produce the same result.
    #[tracing::instrument(skip(self, base, overlay), fields(files = overlay.file_count()))]
    pub async fn apply(
        &self,
        base: &DirectoryNode,
        overlay: &DirectoryUpdate,
    ) -> Result<DirectoryNode, TreeError> {
        let order = overlay.post_order();

        // Parents before children, so each base is found in its parent's base.
        let mut bases: HashMap<&str, DirectoryNode> = HashMap::new();
        if !overlay.replace() {
            bases.insert("", base.clone());
        }
        for (path, update) in order.iter().rev() {
            let Some((parent, name)) = split_parent(path) else {
                continue;
            };
            if update.replace() {
                continue;
            }
            let child = match bases.get(parent) {
                Some(parent_base) => parent_base.open_directory(self.store.as_ref(), name).await?,
                None => None,
            };
            if let Some(child) = child {
                bases.insert(path.as_str(), child);
            }
        }

        let mut written: HashMap<&str, DirectoryRef> = HashMap::new();
        for (path, update) in &order {
            let mut node = bases.remove(path.as_str()).unwrap_or_default();
            self.rewrite(&mut node, path, update, &written).await?;

            if path.is_empty() {
                info!(entries = node.len(), "apply: complete");
                return Ok(node);
            }
            let child_ref = node.persist(self.store.as_ref()).await?;
            debug!(path = %path, id = %child_ref.id, "rewrote directory");
            written.insert(path.as_str(), child_ref);
        }

        // post_order always ends with the root.
        Err(TreeError::Format("overlay has no root".into()))
    }

    /// Apply `overlay` to the persisted tree `base` (or an empty tree) and
    /// persist the new root.
    #[tracing::instrument(skip(self, overlay))]
    pub async fn apply_root(
        &self,
        base: Option<BlobId>,
        overlay: &DirectoryUpdate,
    ) -> Result<DirectoryRef, TreeError> {
        let base = match base {
            Some(id) => DirectoryNode::load(self.store.as_ref(), id).await?,
            None => DirectoryNode::new(),
        };
        let root = self.apply(&base, overlay).await?;
        root.persist(self.store.as_ref()).await
    }

    async fn rewrite(
        &self,
        node: &mut DirectoryNode,
        path: &str,
        update: &DirectoryUpdate,
        written: &HashMap<&str, DirectoryRef>,
    ) -> Result<(), TreeError> {
        // Deletions first so a name can change from file to directory or back.
        for (name, slot) in update.files() {
            if slot.is_none() {
                node.delete_file(name);
            }
        }
        for (name, slot) in update.directories() {
            if slot.is_none() {
                node.delete_directory(name);
            }
        }

        for (name, slot) in update.directories() {
            if slot.is_some() {
                let child_path = join(path, name);
                let child = written.get(child_path.as_str()).copied().ok_or_else(|| {
                    TreeError::InvalidPath {
                        path: child_path.clone(),
                        reason: "subdirectory was not rewritten before its parent",
                    }
                })?;
                node.add_directory(DirectoryEntry::new(name, child))?;
            }
        }

        for (name, slot) in update.files() {
            if let Some(file) = slot {
                let entry = self.materialize(name, file).await?;
                node.add_file(entry)?;
            }
        }
        Ok(())
    }

    /// Turn a file update into an entry, building interior layers if the
    /// content is still a leaf list.
    async fn materialize(&self, name: &str, file: &FileUpdate) -> Result<FileEntry, TreeError> {
        let content: ChunkRef = match &file.content {
            FileContent::Root(root) => *root,
            FileContent::Leaves(leaves) => {
                build_tree(self.store.as_ref(), leaves, &self.opts).await?
            }
        };
        let entry = FileEntry {
            name: name.to_string(),
            flags: file.flags,
            length: file.length,
            stream_hash: file.stream_hash,
            content,
            custom_data: file.custom_data.clone(),
        };
        Ok(entry)
    }
}

fn split_parent(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once('/').unwrap_or(("", path)))
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
