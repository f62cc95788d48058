//! Chunk-tree nodes and the bottom-up layer builder.
//!
//! Leaves hold raw chunk payloads. Interior nodes hold an ordered list of
//! `(hash, length)` child references, encoded as fixed 40-byte records. A
//! layer of references is grouped into interior nodes with the same
//! content-defined principle the chunker applies to bytes, using the first
//! four bytes of each child hash instead of a rolling hash.

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};
use cairn_store::BlobStore;
use cairn_types::{BlobId, BlobType, ChunkKind, ChunkRef, ChunkingOptions, MAX_TREE_HEIGHT};
use tracing::debug;

use crate::error::CasError;

/// Encoded size of one interior child record: 32-byte hash + u64 length.
const CHILD_RECORD_LEN: usize = BlobId::LEN + 8;

/// Raw payload of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// The chunk bytes.
    pub data: Bytes,
}

impl LeafNode {
    /// Reference to this leaf.
    pub fn chunk_ref(&self) -> ChunkRef {
        ChunkRef::leaf(&self.data)
    }
}

/// Ordered list of child references one level below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteriorNode {
    /// Height of this node; children have height `height - 1`.
    pub height: u8,
    /// Child references, in stream order.
    pub children: Vec<ChunkRef>,
}

impl InteriorNode {
    /// Logical payload length: the sum of all children's lengths.
    ///
    /// Fails when the sum does not fit in a `u64`, which only a corrupt or
    /// hostile interior blob can produce.
    pub fn length(&self) -> Result<u64, CasError> {
        self.children.iter().try_fold(0u64, |total, c| {
            total
                .checked_add(c.length)
                .ok_or_else(|| CasError::Format("interior length overflows u64".into()))
        })
    }

    /// Serialize as `N x (hash, u64 little-endian length)`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.children.len() * CHILD_RECORD_LEN);
        for child in &self.children {
            buf.put_slice(child.hash.as_bytes());
            buf.put_u64_le(child.length);
        }
        buf.freeze()
    }

    /// Parse an interior blob of the given height.
    pub fn decode(height: u8, data: &[u8]) -> Result<Self, CasError> {
        if height == 0 {
            return Err(CasError::Format("interior node with height 0".into()));
        }
        let kind = if height == 1 {
            ChunkKind::Leaf
        } else {
            ChunkKind::Interior(height - 1)
        };
        if data.len() % CHILD_RECORD_LEN != 0 {
            return Err(CasError::Format(format!(
                "interior blob length {} is not a multiple of {CHILD_RECORD_LEN}",
                data.len()
            )));
        }

        let children = data
            .chunks_exact(CHILD_RECORD_LEN)
            .map(|record| {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&record[..32]);
                let mut len = [0u8; 8];
                len.copy_from_slice(&record[32..]);
                ChunkRef {
                    hash: BlobId::from(hash),
                    length: u64::from_le_bytes(len),
                    kind,
                }
            })
            .collect();
        Ok(Self { height, children })
    }

    /// Reference to this node.
    pub fn chunk_ref(&self) -> Result<ChunkRef, CasError> {
        Ok(ChunkRef {
            hash: BlobId::for_blob(BlobType::Interior(self.height), &self.encode()),
            length: self.length()?,
            kind: ChunkKind::Interior(self.height),
        })
    }
}

/// A resolved chunk-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Raw payload.
    Leaf(LeafNode),
    /// Child references.
    Interior(InteriorNode),
}

/// Group one layer of references into interior-node ranges.
///
/// A group closes after a child whose hash slice falls below
/// `2^32 / target_child_count` once it holds `min_child_count` children, or
/// unconditionally at `max_child_count`. The last group may be short.
pub fn split_layer(children: &[ChunkRef], opts: &ChunkingOptions) -> Vec<Range<usize>> {
    let threshold = opts.slice_threshold();
    let min = opts.min_child_count as usize;
    let max = opts.max_child_count as usize;

    let mut groups = Vec::new();
    let mut start = 0;
    for (i, child) in children.iter().enumerate() {
        let count = i + 1 - start;
        if count >= max || (count >= min && u64::from(child.hash.slice_u32()) < threshold) {
            groups.push(start..i + 1);
            start = i + 1;
        }
    }
    if start < children.len() {
        groups.push(start..children.len());
    }
    groups
}

/// Build the interior layers over `leaves` and return the root reference.
///
/// An empty list yields [`ChunkRef::empty`]; a single leaf is its own root.
/// Every interior node is written to `store` as it is built.
pub async fn build_tree(
    store: &dyn BlobStore,
    leaves: &[ChunkRef],
    opts: &ChunkingOptions,
) -> Result<ChunkRef, CasError> {
    opts.validate().map_err(CasError::InvalidOptions)?;

    let mut layer = match leaves {
        [] => return Ok(ChunkRef::empty()),
        [single] => return Ok(*single),
        _ => leaves.to_vec(),
    };

    let mut height: u8 = 1;
    while layer.len() > 1 {
        if height > MAX_TREE_HEIGHT {
            return Err(CasError::Format("chunk tree exceeds maximum height".into()));
        }
        let mut next = Vec::new();
        for range in split_layer(&layer, opts) {
            let node = InteriorNode {
                height,
                children: layer[range].to_vec(),
            };
            let encoded = node.encode();
            let hash = store.put(BlobType::Interior(height), encoded).await?;
            next.push(ChunkRef {
                hash,
                length: node.length()?,
                kind: ChunkKind::Interior(height),
            });
        }
        debug!(height, nodes = next.len(), "built interior layer");
        layer = next;
        height += 1;
    }

    Ok(layer[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_store::MemoryStore;

    fn leaf(i: u32) -> ChunkRef {
        ChunkRef::leaf(&i.to_le_bytes())
    }

    fn opts() -> ChunkingOptions {
        ChunkingOptions {
            min_child_count: 2,
            target_child_count: 4,
            max_child_count: 8,
            ..ChunkingOptions::default()
        }
    }

    #[test]
    fn test_interior_encode_decode() {
        let node = InteriorNode {
            height: 1,
            children: (0..5).map(leaf).collect(),
        };
        let encoded = node.encode();
        assert_eq!(encoded.len(), 5 * CHILD_RECORD_LEN);
        assert_eq!(InteriorNode::decode(1, &encoded).unwrap(), node);
    }

    #[test]
    fn test_interior_decode_rejects_ragged_blob() {
        let err = InteriorNode::decode(1, &[0u8; 41]).unwrap_err();
        assert!(matches!(err, CasError::Format(_)));
        assert!(InteriorNode::decode(0, &[]).is_err());
    }

    #[test]
    fn test_interior_length_overflow_is_format_error() {
        let node = InteriorNode {
            height: 1,
            children: vec![
                ChunkRef {
                    hash: BlobId::from([1u8; 32]),
                    length: u64::MAX,
                    kind: ChunkKind::Leaf,
                },
                ChunkRef {
                    hash: BlobId::from([2u8; 32]),
                    length: 1,
                    kind: ChunkKind::Leaf,
                },
            ],
        };
        let err = node.length().unwrap_err();
        assert!(matches!(err, CasError::Format(ref m) if m.contains("overflows")));
        assert!(node.chunk_ref().is_err());

        let fits = InteriorNode {
            height: 1,
            children: (0..3).map(leaf).collect(),
        };
        assert_eq!(fits.length().unwrap(), 12);
        assert_eq!(fits.chunk_ref().unwrap().length, 12);
    }

    #[test]
    fn test_decoded_children_kind_follows_height() {
        let node = InteriorNode {
            height: 2,
            children: vec![ChunkRef {
                hash: BlobId::from([7u8; 32]),
                length: 99,
                kind: ChunkKind::Interior(1),
            }],
        };
        let decoded = InteriorNode::decode(2, &node.encode()).unwrap();
        assert_eq!(decoded.children[0].kind, ChunkKind::Interior(1));
    }

    #[test]
    fn test_split_layer_respects_bounds() {
        let layer: Vec<ChunkRef> = (0..1000).map(leaf).collect();
        let o = opts();
        let groups = split_layer(&layer, &o);

        let mut next = 0;
        for (i, g) in groups.iter().enumerate() {
            assert_eq!(g.start, next, "groups must be contiguous");
            next = g.end;
            assert!(g.len() <= o.max_child_count as usize);
            if i < groups.len() - 1 {
                assert!(g.len() >= o.min_child_count as usize);
            }
        }
        assert_eq!(next, layer.len());
    }

    #[test]
    fn test_split_layer_is_content_defined() {
        // Dropping the first element only disturbs the leading groups.
        let layer: Vec<ChunkRef> = (0..400).map(leaf).collect();
        let a = split_layer(&layer, &opts());
        let b = split_layer(&layer[1..], &opts());
        let ends_a: Vec<usize> = a.iter().map(|g| g.end).skip(a.len() / 2).collect();
        let ends_b: Vec<usize> = b.iter().map(|g| g.end + 1).collect();
        assert!(ends_a.iter().all(|e| ends_b.contains(e)));
    }

    #[tokio::test]
    async fn test_build_tree_empty_and_single() {
        let store = MemoryStore::unbounded();
        let root = build_tree(&store, &[], &opts()).await.unwrap();
        assert_eq!(root, ChunkRef::empty());

        let only = leaf(1);
        let root = build_tree(&store, &[only], &opts()).await.unwrap();
        assert_eq!(root, only);
        assert!(store.is_empty(), "no interior node for a single leaf");
    }

    #[tokio::test]
    async fn test_build_tree_multi_level() {
        let store = MemoryStore::unbounded();
        let leaves: Vec<ChunkRef> = (0..500).map(leaf).collect();
        let root = build_tree(&store, &leaves, &opts()).await.unwrap();

        assert!(root.kind.height() >= 2, "500 leaves need several layers");
        assert_eq!(root.length, 500 * 4);
    }

    #[tokio::test]
    async fn test_build_tree_deterministic() {
        let leaves: Vec<ChunkRef> = (0..300).map(leaf).collect();
        let a = build_tree(&MemoryStore::unbounded(), &leaves, &opts())
            .await
            .unwrap();
        let b = build_tree(&MemoryStore::unbounded(), &leaves, &opts())
            .await
            .unwrap();
        assert_eq!(a, b);
    }
}
