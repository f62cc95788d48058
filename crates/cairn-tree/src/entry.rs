//! File and directory entries.

use bytes::Bytes;
use cairn_types::{BlobId, ChunkRef, FileFlags, StreamHash};

use crate::error::TreeError;

/// A named file inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Name within the parent directory.
    pub name: String,
    /// Persisted flag bits.
    pub flags: FileFlags,
    /// File size in bytes; always equal to `content.length`.
    pub length: u64,
    /// `blake3` of the whole file.
    pub stream_hash: StreamHash,
    /// Root of the file's chunk tree.
    pub content: ChunkRef,
    /// Opaque caller data stored alongside the entry.
    pub custom_data: Option<Bytes>,
}

impl FileEntry {
    /// Entry whose length is taken from the content root.
    pub fn new(
        name: impl Into<String>,
        flags: FileFlags,
        stream_hash: StreamHash,
        content: ChunkRef,
    ) -> Self {
        Self {
            name: name.into(),
            flags,
            length: content.length,
            stream_hash,
            content,
            custom_data: None,
        }
    }

    /// Attach custom data.
    pub fn with_custom_data(mut self, data: Bytes) -> Self {
        self.custom_data = Some(data);
        self
    }

    /// Whether custom data is attached. Derived, never stored separately.
    pub fn has_custom_data(&self) -> bool {
        self.custom_data.is_some()
    }

    pub(crate) fn check(&self) -> Result<(), TreeError> {
        validate_name(&self.name)?;
        if self.length != self.content.length {
            return Err(TreeError::InvalidEntry {
                name: self.name.clone(),
                reason: format!(
                    "length {} differs from content length {}",
                    self.length, self.content.length
                ),
            });
        }
        Ok(())
    }
}

/// Persisted identity of a directory node: its blob id and total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectoryRef {
    /// Id of the `Directory` blob.
    pub id: BlobId,
    /// Sum of the direct children's lengths when the node was written.
    pub length: u64,
}

/// A named subdirectory inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Name within the parent directory.
    pub name: String,
    /// Cached total length of the subdirectory.
    pub length: u64,
    /// Id of the child `Directory` blob.
    pub child: BlobId,
}

impl DirectoryEntry {
    /// Entry pointing at a persisted child.
    pub fn new(name: impl Into<String>, child: DirectoryRef) -> Self {
        Self {
            name: name.into(),
            length: child.length,
            child: child.id,
        }
    }

    /// The child reference this entry carries.
    pub fn child_ref(&self) -> DirectoryRef {
        DirectoryRef {
            id: self.child,
            length: self.length,
        }
    }
}

/// Reject names that cannot appear as a single path segment.
pub fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(TreeError::InvalidName(name.to_string()));
    }
    Ok(())
}
