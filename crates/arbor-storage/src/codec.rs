//! Fixed-size node record codec.
//!
//! Every node occupies one slot of the same size. Layout (big-endian):
//!
//! ```text
//! free          1 byte    0 or 1
//! n_descendants 4 bytes   i32, variant discriminant
//! key           4 bytes   i32, leaves only (0 otherwise)
//! parents       T×4 bytes i32 per tree, -1 root, -2 not a member
//! tail          8 + D×8 bytes
//!   leaf/internal: children[2] (i32), v (D × f64)
//!   bucket:        items (n × i32), zero padding
//! ```

use crate::node::{Node, NodeKind};
use arbor_common::{ArborError, ForestConfig, NodeId, ParentRef, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const FREE_OFFSET: usize = 0;
const N_DESCENDANTS_OFFSET: usize = FREE_OFFSET + 1;
const KEY_OFFSET: usize = N_DESCENDANTS_OFFSET + 4;
const PARENTS_OFFSET: usize = KEY_OFFSET + 4;

/// Size of one parent entry.
pub const PARENT_SIZE: usize = 4;

/// Physical layout of a store's records, fixed by its forest configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    trees: usize,
    dim: usize,
    bucket_size: usize,
    record_size: usize,
}

impl RecordLayout {
    /// Computes the layout for a validated forest configuration.
    pub fn new(forest: &ForestConfig) -> Result<Self> {
        forest.validate()?;
        let record_size = PARENTS_OFFSET + PARENT_SIZE * forest.trees + forest.tail_width();
        Ok(Self {
            trees: forest.trees,
            dim: forest.dim,
            bucket_size: forest.bucket_size,
            record_size,
        })
    }

    pub fn trees(&self) -> usize {
        self.trees
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Size of one record in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Offset of the variant tail within a record.
    pub fn tail_offset(&self) -> usize {
        PARENTS_OFFSET + PARENT_SIZE * self.trees
    }

    fn tail_width(&self) -> usize {
        self.record_size - self.tail_offset()
    }

    /// Offset of `parents[tree]` within a record.
    pub fn parent_offset(&self, tree: usize) -> Result<usize> {
        if tree >= self.trees {
            return Err(ArborError::TreeIndexOutOfRange {
                index: tree,
                trees: self.trees,
            });
        }
        Ok(PARENTS_OFFSET + PARENT_SIZE * tree)
    }

    /// Byte offset of a record slot in the node file.
    pub fn record_offset(&self, id: NodeId) -> u64 {
        id.index() * self.record_size as u64
    }

    /// Encodes a node into a full record.
    pub fn encode(&self, node: &Node) -> Result<Bytes> {
        self.check(node)?;

        let mut buf = BytesMut::with_capacity(self.record_size);
        buf.put_u8(node.free as u8);
        buf.put_i32(node.n_descendants() as i32);
        buf.put_i32(node.key().unwrap_or(0));
        for parent in &node.parents {
            buf.put_i32(parent.to_i32());
        }

        match &node.kind {
            NodeKind::Leaf { v, .. } => {
                buf.put_bytes(0, 2 * 4);
                put_vector(&mut buf, v);
            }
            NodeKind::Internal { children, v, .. } => {
                for child in children {
                    buf.put_i32(child.to_i32());
                }
                put_vector(&mut buf, v);
            }
            NodeKind::Bucket { items } => {
                for item in items {
                    buf.put_i32(item.to_i32());
                }
                buf.put_bytes(0, self.tail_width() - 4 * items.len());
            }
        }

        debug_assert_eq!(buf.len(), self.record_size);
        Ok(buf.freeze())
    }

    /// Decodes the record stored in slot `id`.
    pub fn decode(&self, id: NodeId, data: &[u8]) -> Result<Node> {
        if data.len() != self.record_size {
            return Err(corrupted(
                id,
                format!(
                    "record is {} bytes, expected {}",
                    data.len(),
                    self.record_size
                ),
            ));
        }

        let mut buf = data;
        let free = buf.get_u8() != 0;
        let n_descendants = buf.get_i32();
        let key = buf.get_i32();

        let mut parents = Vec::with_capacity(self.trees);
        for tree in 0..self.trees {
            let raw = buf.get_i32();
            let parent = ParentRef::from_i32(raw).ok_or_else(|| {
                corrupted(id, format!("invalid parent {} in tree {}", raw, tree))
            })?;
            parents.push(parent);
        }

        let kind = match n_descendants {
            n if n < 1 => {
                return Err(corrupted(id, format!("descendant count {}", n)));
            }
            1 => {
                buf.advance(2 * 4);
                NodeKind::Leaf {
                    key,
                    v: get_vector(&mut buf, self.dim),
                }
            }
            n if n as usize <= self.bucket_size => {
                let items = (0..n)
                    .map(|_| child_id(id, buf.get_i32()))
                    .collect::<Result<Vec<_>>>()?;
                NodeKind::Bucket { items }
            }
            n => {
                let children = [child_id(id, buf.get_i32())?, child_id(id, buf.get_i32())?];
                NodeKind::Internal {
                    n_descendants: n as u32,
                    children,
                    v: get_vector(&mut buf, self.dim),
                }
            }
        };

        Ok(Node {
            id,
            free,
            parents,
            kind,
        })
    }

    /// Rejects node values that do not fit this layout.
    fn check(&self, node: &Node) -> Result<()> {
        if node.parents.len() != self.trees {
            return Err(ArborError::InvalidNode(format!(
                "node {} has {} parents, forest has {} trees",
                node.id,
                node.parents.len(),
                self.trees
            )));
        }
        for parent in &node.parents {
            if let Some(p) = parent.node() {
                check_id(p)?;
            }
        }

        match &node.kind {
            NodeKind::Leaf { v, .. } => self.check_vector(v),
            NodeKind::Bucket { items } => {
                if items.len() < 2 || items.len() > self.bucket_size {
                    return Err(ArborError::InvalidNode(format!(
                        "bucket holds {} items, must hold 2..={}",
                        items.len(),
                        self.bucket_size
                    )));
                }
                items.iter().try_for_each(|item| check_id(*item))
            }
            NodeKind::Internal {
                n_descendants,
                children,
                v,
            } => {
                if (*n_descendants as usize) <= self.bucket_size || *n_descendants > i32::MAX as u32
                {
                    return Err(ArborError::InvalidNode(format!(
                        "internal node with {} descendants, bucket size is {}",
                        n_descendants, self.bucket_size
                    )));
                }
                children.iter().try_for_each(|child| check_id(*child))?;
                self.check_vector(v)
            }
        }
    }

    fn check_vector(&self, v: &[f64]) -> Result<()> {
        if v.len() != self.dim {
            return Err(ArborError::DimensionMismatch {
                expected: self.dim,
                actual: v.len(),
            });
        }
        Ok(())
    }
}

fn put_vector(buf: &mut BytesMut, v: &[f64]) {
    for component in v {
        buf.put_f64(*component);
    }
}

fn get_vector(buf: &mut &[u8], dim: usize) -> Vec<f64> {
    (0..dim).map(|_| buf.get_f64()).collect()
}

fn check_id(id: NodeId) -> Result<()> {
    if id > NodeId::MAX {
        return Err(ArborError::InvalidNode(format!(
            "id {} does not fit in a record",
            id
        )));
    }
    Ok(())
}

fn child_id(id: NodeId, raw: i32) -> Result<NodeId> {
    NodeId::from_i32(raw).ok_or_else(|| corrupted(id, format!("negative child id {}", raw)))
}

fn corrupted(id: NodeId, reason: String) -> ArborError {
    ArborError::RecordCorrupted { id: id.0, reason }
}
