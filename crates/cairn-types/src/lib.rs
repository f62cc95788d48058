//! Shared types and identifiers for cairn.
//!
//! This crate defines the core types used across the cairn workspace:
//! identifiers ([`BlobId`], [`StreamHash`]), blob typing ([`BlobType`],
//! [`ChunkKind`]), the chunk-tree reference ([`ChunkRef`]), file flags
//! ([`FileFlags`]) and configuration ([`ChunkingOptions`], [`ExtractConfig`],
//! [`IngestConfig`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod config;

pub use config::{ChunkingOptions, ExtractConfig, IngestConfig};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Width of the identifier in bytes.
            pub const LEN: usize = 32;

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }
    };
}

define_id!(
    /// Content-addressed identifier for a stored blob: `blake3(tag || payload)`.
    ///
    /// The one-byte [`BlobType`] tag is mixed into the hash so a leaf and an
    /// interior node with identical payload bytes never share an id.
    BlobId
);

define_id!(
    /// Whole-content identity of a byte stream: `blake3(stream)`.
    ///
    /// Independent of how the stream was chunked.
    StreamHash
);

impl BlobId {
    /// Compute the id of a blob with the given type and payload.
    pub fn for_blob(blob_type: BlobType, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[blob_type.tag()]);
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// The first four bytes of the id read as a little-endian `u32`.
    ///
    /// Interior layers cut on this value the way leaves cut on the rolling hash.
    pub fn slice_u32(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl StreamHash {
    /// Hash a complete in-memory stream.
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }

    /// Finish an incremental hasher.
    pub fn from_hasher(hasher: &blake3::Hasher) -> Self {
        Self(hasher.finalize().into())
    }
}

/// Error returned when parsing a hex identifier fails.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid identifier: {0}")]
pub struct ParseIdError(#[from] hex::FromHexError);

// ---------------------------------------------------------------------------
// Blob typing
// ---------------------------------------------------------------------------

/// Type tag the blob store keeps next to every payload.
///
/// Encoded as a single byte: `0` leaf, `1` directory, `1 + h` for an
/// interior node of height `h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobType {
    /// Raw chunk payload.
    Leaf,
    /// Serialized directory node.
    Directory,
    /// Interior chunk-tree node. Height 1 references leaves.
    Interior(u8),
}

/// Highest interior height that still fits the one-byte tag.
pub const MAX_TREE_HEIGHT: u8 = u8::MAX - 1;

impl BlobType {
    /// One-byte wire tag.
    pub fn tag(self) -> u8 {
        match self {
            BlobType::Leaf => 0,
            BlobType::Directory => 1,
            BlobType::Interior(height) => 1 + height,
        }
    }

    /// Parse a wire tag. Returns `None` for unknown values.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(BlobType::Leaf),
            1 => Some(BlobType::Directory),
            u8::MAX => None,
            t => Some(BlobType::Interior(t - 1)),
        }
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobType::Leaf => write!(f, "leaf"),
            BlobType::Directory => write!(f, "directory"),
            BlobType::Interior(h) => write!(f, "interior(h={h})"),
        }
    }
}

/// Which kind of chunk-tree node a [`ChunkRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkKind {
    /// A leaf holding raw payload bytes.
    Leaf,
    /// An interior node of the given height (>= 1).
    Interior(u8),
}

impl ChunkKind {
    /// The store type tag for blobs of this kind.
    pub fn blob_type(self) -> BlobType {
        match self {
            ChunkKind::Leaf => BlobType::Leaf,
            ChunkKind::Interior(h) => BlobType::Interior(h),
        }
    }

    /// Map a store type back to a chunk kind. Directories are not chunks.
    pub fn from_blob_type(blob_type: BlobType) -> Option<Self> {
        match blob_type {
            BlobType::Leaf => Some(ChunkKind::Leaf),
            BlobType::Interior(h) if h >= 1 => Some(ChunkKind::Interior(h)),
            _ => None,
        }
    }

    /// Tree height: 0 for leaves.
    pub fn height(self) -> u8 {
        match self {
            ChunkKind::Leaf => 0,
            ChunkKind::Interior(h) => h,
        }
    }

    /// The kind of this node's children, if it has any.
    pub fn child_kind(self) -> Option<ChunkKind> {
        match self {
            ChunkKind::Leaf => None,
            ChunkKind::Interior(h) if h <= 1 => Some(ChunkKind::Leaf),
            ChunkKind::Interior(h) => Some(ChunkKind::Interior(h - 1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk references
// ---------------------------------------------------------------------------

/// Capability to a chunk-tree node stored in a blob store.
///
/// Two references with equal `hash` are interchangeable: the length and kind
/// are functions of the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Content-addressed id of the node blob.
    pub hash: BlobId,
    /// Logical payload length: the leaf size, or the sum of all descendant leaves.
    pub length: u64,
    /// Leaf or interior node.
    pub kind: ChunkKind,
}

impl ChunkRef {
    /// Reference to a leaf with the given payload.
    pub fn leaf(data: &[u8]) -> Self {
        Self {
            hash: BlobId::for_blob(BlobType::Leaf, data),
            length: data.len() as u64,
            kind: ChunkKind::Leaf,
        }
    }

    /// Root reference of a zero-length stream.
    ///
    /// Never needs to be fetched: readers short-circuit on `length == 0`.
    pub fn empty() -> Self {
        Self::leaf(&[])
    }

    /// Whether this reference points at a leaf.
    pub fn is_leaf(&self) -> bool {
        self.kind == ChunkKind::Leaf
    }
}

// ---------------------------------------------------------------------------
// File flags
// ---------------------------------------------------------------------------

/// Persisted per-file flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFlags(u32);

impl FileFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// File should be marked executable when materialized.
    pub const EXECUTABLE: Self = Self(1 << 0);
    /// File should be marked read-only when materialized.
    pub const READ_ONLY: Self = Self(1 << 1);
    /// Content is text.
    pub const TEXT: Self = Self(1 << 2);
    /// Text content is UTF-16 encoded.
    pub const UTF16: Self = Self(1 << 3);

    /// All bits a caller may set.
    pub const ALL: Self = Self(0b1111);

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, rejecting unknown ones.
    pub fn from_bits(bits: u32) -> Option<Self> {
        (bits & !Self::ALL.0 == 0).then_some(Self(bits))
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Whether no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for FileFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
