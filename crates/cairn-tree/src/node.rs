//! In-memory directory node, persistence and path resolution.

use std::collections::BTreeMap;

use bytes::Bytes;
use cairn_cas::CasError;
use cairn_store::BlobStore;
use cairn_types::{BlobId, BlobType};
use tracing::debug;

use crate::codec::{decode_directory, encode_directory};
use crate::entry::{DirectoryEntry, DirectoryRef, FileEntry, validate_name};
use crate::error::TreeError;

/// One directory level.
///
/// Files and subdirectories live in separate maps but share one namespace:
/// a name may be a file or a directory, never both. Nodes are values; every
/// change to a persisted tree produces a new node and a new blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    files: BTreeMap<String, FileEntry>,
    directories: BTreeMap<String, DirectoryEntry>,
}

impl DirectoryNode {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file. Fails if a subdirectory has the same name.
    pub fn add_file(&mut self, entry: FileEntry) -> Result<Option<FileEntry>, TreeError> {
        entry.check()?;
        if self.directories.contains_key(&entry.name) {
            return Err(TreeError::NameCollision {
                name: entry.name,
                existing: "directory",
            });
        }
        Ok(self.files.insert(entry.name.clone(), entry))
    }

    /// Insert or replace a subdirectory. Fails if a file has the same name.
    pub fn add_directory(
        &mut self,
        entry: DirectoryEntry,
    ) -> Result<Option<DirectoryEntry>, TreeError> {
        validate_name(&entry.name)?;
        if self.files.contains_key(&entry.name) {
            return Err(TreeError::NameCollision {
                name: entry.name,
                existing: "file",
            });
        }
        Ok(self.directories.insert(entry.name.clone(), entry))
    }

    /// Look up a file by name.
    pub fn file_entry(&self, name: &str) -> Option<&FileEntry> {
        self.files.get(name)
    }

    /// Look up a subdirectory by name.
    pub fn directory_entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.directories.get(name)
    }

    /// Remove a file, returning it if it existed.
    pub fn delete_file(&mut self, name: &str) -> Option<FileEntry> {
        self.files.remove(name)
    }

    /// Remove a subdirectory, returning its entry if it existed.
    pub fn delete_directory(&mut self, name: &str) -> Option<DirectoryEntry> {
        self.directories.remove(name)
    }

    /// Files in ascending name order.
    pub fn files(&self) -> impl DoubleEndedIterator<Item = &FileEntry> + ExactSizeIterator {
        self.files.values()
    }

    /// Subdirectories in ascending name order.
    pub fn directories(
        &self,
    ) -> impl DoubleEndedIterator<Item = &DirectoryEntry> + ExactSizeIterator {
        self.directories.values()
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.files.len() + self.directories.len()
    }

    /// Whether the directory has no children.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }

    /// Sum of the direct children's lengths.
    ///
    /// Computed from the current entries. For a node fresh from
    /// [`DirectoryNode::load`] this equals the length cached in its parent.
    pub fn length(&self) -> Result<u64, TreeError> {
        self.files
            .values()
            .map(|f| f.length)
            .chain(self.directories.values().map(|d| d.length))
            .try_fold(0u64, |total, len| {
                total
                    .checked_add(len)
                    .ok_or_else(|| TreeError::Format("directory length overflows u64".into()))
            })
    }

    /// Serialize this level.
    pub fn encode(&self) -> Bytes {
        encode_directory(self.files.values(), self.directories.values())
    }

    /// Parse a directory blob.
    pub fn decode(data: &[u8]) -> Result<Self, TreeError> {
        let (files, directories) = decode_directory(data)?;
        let mut node = Self::new();
        for file in files {
            node.files.insert(file.name.clone(), file);
        }
        for dir in directories {
            if node.files.contains_key(&dir.name) {
                return Err(TreeError::Format(format!(
                    "{:?} is both a file and a directory",
                    dir.name
                )));
            }
            node.directories.insert(dir.name.clone(), dir);
        }
        Ok(node)
    }

    /// Write this node as a `Directory` blob, recomputing its length.
    pub async fn persist(&self, store: &dyn BlobStore) -> Result<DirectoryRef, TreeError> {
        let length = self.length()?;
        let id = store.put(BlobType::Directory, self.encode()).await?;
        debug!(%id, length, entries = self.len(), "persisted directory");
        Ok(DirectoryRef { id, length })
    }

    /// Fetch, verify and decode a `Directory` blob.
    pub async fn load(store: &dyn BlobStore, id: BlobId) -> Result<Self, TreeError> {
        let blob = store.get(id).await?.ok_or(CasError::Fetch(id))?;
        if blob.blob_type != BlobType::Directory {
            return Err(CasError::UnexpectedType {
                id,
                expected: BlobType::Directory,
                found: blob.blob_type,
            }
            .into());
        }
        let actual = blob.id();
        if actual != id {
            return Err(CasError::Integrity {
                id,
                reason: format!("directory content hashes to {actual}"),
            }
            .into());
        }
        Self::decode(&blob.data)
    }

    /// Load the named subdirectory. `None` if there is no such entry.
    pub async fn open_directory(
        &self,
        store: &dyn BlobStore,
        name: &str,
    ) -> Result<Option<DirectoryNode>, TreeError> {
        match self.directories.get(name) {
            Some(entry) => Ok(Some(Self::load(store, entry.child).await?)),
            None => Ok(None),
        }
    }

    /// Resolve a `/`-separated path to a directory, one level at a time.
    ///
    /// Empty segments are ignored, so `""` resolves to this node. Any missing
    /// segment yields `None`.
    pub async fn directory_by_path(
        &self,
        store: &dyn BlobStore,
        path: &str,
    ) -> Result<Option<DirectoryNode>, TreeError> {
        let mut current = self.clone();
        for segment in segments(path) {
            match current.open_directory(store, segment).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Resolve a `/`-separated path to a file entry.
    pub async fn file_entry_by_path(
        &self,
        store: &dyn BlobStore,
        path: &str,
    ) -> Result<Option<FileEntry>, TreeError> {
        let parts: Vec<&str> = segments(path).collect();
        let Some((name, dirs)) = parts.split_last() else {
            return Ok(None);
        };

        let mut current: Option<DirectoryNode> = None;
        for dir in dirs {
            let parent = current.as_ref().unwrap_or(self);
            match parent.open_directory(store, dir).await? {
                Some(next) => current = Some(next),
                None => return Ok(None),
            }
        }
        let parent = current.as_ref().unwrap_or(self);
        Ok(parent.file_entry(name).cloned())
    }
}

/// Non-empty segments of a `/`-separated path.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_store::MemoryStore;
    use cairn_types::{ChunkRef, FileFlags, StreamHash};

    fn file(name: &str, body: &[u8]) -> FileEntry {
        FileEntry::new(
            name,
            FileFlags::NONE,
            StreamHash::from_data(body),
            ChunkRef::leaf(body),
        )
    }

    /// Builds `a/b.txt`, `a/c/d.txt` and `top.txt`; returns the root node.
    async fn sample_tree(store: &MemoryStore) -> DirectoryNode {
        let mut c = DirectoryNode::new();
        c.add_file(file("d.txt", b"dddd")).unwrap();
        let c_ref = c.persist(store).await.unwrap();

        let mut a = DirectoryNode::new();
        a.add_file(file("b.txt", b"bb")).unwrap();
        a.add_directory(DirectoryEntry::new("c", c_ref)).unwrap();
        let a_ref = a.persist(store).await.unwrap();

        let mut root = DirectoryNode::new();
        root.add_directory(DirectoryEntry::new("a", a_ref)).unwrap();
        root.add_file(file("top.txt", b"t")).unwrap();
        root
    }

    #[test]
    fn test_namespace_collision() {
        let mut node = DirectoryNode::new();
        node.add_file(file("x", b"1")).unwrap();
        let dir = DirectoryEntry {
            name: "x".into(),
            length: 0,
            child: BlobId::from([0u8; 32]),
        };
        assert!(matches!(
            node.add_directory(dir.clone()),
            Err(TreeError::NameCollision { existing: "file", .. })
        ));

        let mut node = DirectoryNode::new();
        node.add_directory(dir).unwrap();
        assert!(matches!(
            node.add_file(file("x", b"1")),
            Err(TreeError::NameCollision { existing: "directory", .. })
        ));
    }

    #[test]
    fn test_replace_within_namespace() {
        let mut node = DirectoryNode::new();
        assert!(node.add_file(file("f", b"old")).unwrap().is_none());
        let previous = node.add_file(file("f", b"newer")).unwrap().unwrap();
        assert_eq!(previous.length, 3);
        assert_eq!(node.file_entry("f").unwrap().length, 5);
        assert_eq!(node.len(), 1);
    }

    #[test]
    fn test_not_found_is_none() {
        let mut node = DirectoryNode::new();
        assert!(node.file_entry("missing").is_none());
        assert!(node.directory_entry("missing").is_none());
        assert!(node.delete_file("missing").is_none());
        assert!(node.delete_directory("missing").is_none());
    }

    #[test]
    fn test_length_recomputed() {
        let mut node = DirectoryNode::new();
        node.add_file(file("a", b"12345")).unwrap();
        node.add_directory(DirectoryEntry {
            name: "d".into(),
            length: 100,
            child: BlobId::from([1u8; 32]),
        })
        .unwrap();
        assert_eq!(node.length().unwrap(), 105);
        node.delete_file("a");
        assert_eq!(node.length().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_length_overflow_is_format_error() {
        let store = MemoryStore::unbounded();
        let mut node = DirectoryNode::new();
        node.add_file(file("a", b"12345")).unwrap();
        node.add_directory(DirectoryEntry {
            name: "huge".into(),
            length: u64::MAX,
            child: BlobId::from([1u8; 32]),
        })
        .unwrap();

        let err = node.length().unwrap_err();
        assert!(matches!(err, TreeError::Format(ref m) if m.contains("overflows")));
        assert!(matches!(
            node.persist(&store).await,
            Err(TreeError::Format(_))
        ));
    }

    #[tokio::test]
    async fn test_persist_load_roundtrip() {
        let store = MemoryStore::unbounded();
        let root = sample_tree(&store).await;
        let root_ref = root.persist(&store).await.unwrap();

        assert_eq!(root_ref.length, 2 + 4 + 1);
        let loaded = DirectoryNode::load(&store, root_ref.id).await.unwrap();
        assert_eq!(loaded, root);
        assert_eq!(loaded.directory_entry("a").unwrap().length, 6);
    }

    #[tokio::test]
    async fn test_persist_is_deterministic() {
        let store = MemoryStore::unbounded();
        let a = sample_tree(&store).await.persist(&store).await.unwrap();
        let b = sample_tree(&store).await.persist(&store).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_path_resolution() {
        let store = MemoryStore::unbounded();
        let root = sample_tree(&store).await;

        let b = root.file_entry_by_path(&store, "a/b.txt").await.unwrap();
        assert_eq!(b.unwrap().length, 2);
        let d = root.file_entry_by_path(&store, "a/c/d.txt").await.unwrap();
        assert_eq!(d.unwrap().length, 4);
        let top = root.file_entry_by_path(&store, "top.txt").await.unwrap();
        assert!(top.is_some());

        assert!(root.file_entry_by_path(&store, "a/x.txt").await.unwrap().is_none());
        assert!(root.file_entry_by_path(&store, "nope/b.txt").await.unwrap().is_none());
        assert!(root.file_entry_by_path(&store, "a").await.unwrap().is_none());
        assert!(root.file_entry_by_path(&store, "").await.unwrap().is_none());

        let c = root.directory_by_path(&store, "a/c").await.unwrap().unwrap();
        assert!(c.file_entry("d.txt").is_some());
        assert!(root.directory_by_path(&store, "a/b.txt").await.unwrap().is_none());
        assert_eq!(root.directory_by_path(&store, "/").await.unwrap(), Some(root.clone()));
    }

    #[tokio::test]
    async fn test_load_missing_is_fetch_failure() {
        let store = MemoryStore::unbounded();
        let err = DirectoryNode::load(&store, BlobId::from([3u8; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::Cas(CasError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_leaf_blob() {
        let store = MemoryStore::unbounded();
        let id = store
            .put(BlobType::Leaf, Bytes::from_static(&[0, 0, 0]))
            .await
            .unwrap();
        let err = DirectoryNode::load(&store, id).await.unwrap_err();
        assert!(matches!(err, TreeError::Cas(CasError::UnexpectedType { .. })));
    }
}
