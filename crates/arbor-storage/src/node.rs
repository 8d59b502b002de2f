//! In-memory node representation.

use arbor_common::{NodeId, ParentRef};

/// Variant-specific payload of a node.
///
/// The kind is derived from the descendant count on disk:
/// 1 is a leaf, 2..=K a bucket, anything larger an internal node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A single item with its embedding.
    Leaf { key: i32, v: Vec<f64> },
    /// Up to K item ids held directly. The descendant count is `items.len()`.
    Bucket { items: Vec<NodeId> },
    /// A split with two subtrees and a splitting hyperplane.
    Internal {
        n_descendants: u32,
        children: [NodeId; 2],
        v: Vec<f64>,
    },
}

/// One entry of the forest.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Slot id. Ignored by create, which assigns it.
    pub id: NodeId,
    /// Tombstone flag.
    pub free: bool,
    /// Parent in each tree; length equals the tree count.
    pub parents: Vec<ParentRef>,
    pub kind: NodeKind,
}

impl Node {
    /// Creates a leaf that is not yet a member of any tree.
    pub fn leaf(key: i32, v: Vec<f64>, trees: usize) -> Self {
        Self {
            id: NodeId::default(),
            free: false,
            parents: vec![ParentRef::Detached; trees],
            kind: NodeKind::Leaf { key, v },
        }
    }

    /// Creates a bucket holding `items`, detached from every tree.
    pub fn bucket(items: Vec<NodeId>, trees: usize) -> Self {
        Self {
            id: NodeId::default(),
            free: false,
            parents: vec![ParentRef::Detached; trees],
            kind: NodeKind::Bucket { items },
        }
    }

    /// Creates an internal node, detached from every tree.
    pub fn internal(n_descendants: u32, children: [NodeId; 2], v: Vec<f64>, trees: usize) -> Self {
        Self {
            id: NodeId::default(),
            free: false,
            parents: vec![ParentRef::Detached; trees],
            kind: NodeKind::Internal {
                n_descendants,
                children,
                v,
            },
        }
    }

    /// Sets the slot id.
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Sets the parent for one tree.
    ///
    /// `tree` must be below the node's tree count. Debug builds panic on an
    /// out-of-range index; release builds leave the node unchanged, and the
    /// store's `update_parent` reports `TreeIndexOutOfRange` for the same
    /// mistake.
    pub fn with_parent(mut self, tree: usize, parent: ParentRef) -> Self {
        debug_assert!(
            tree < self.parents.len(),
            "tree index {} out of range for {} trees",
            tree,
            self.parents.len()
        );
        if let Some(slot) = self.parents.get_mut(tree) {
            *slot = parent;
        }
        self
    }

    /// Number of leaves reachable under this node.
    pub fn n_descendants(&self) -> u32 {
        match &self.kind {
            NodeKind::Leaf { .. } => 1,
            NodeKind::Bucket { items } => items.len() as u32,
            NodeKind::Internal { n_descendants, .. } => *n_descendants,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn is_bucket(&self) -> bool {
        matches!(self.kind, NodeKind::Bucket { .. })
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind, NodeKind::Internal { .. })
    }

    /// Item key, for leaves.
    pub fn key(&self) -> Option<i32> {
        match &self.kind {
            NodeKind::Leaf { key, .. } => Some(*key),
            _ => None,
        }
    }

    /// Embedding or splitting vector. Buckets carry none.
    pub fn vector(&self) -> Option<&[f64]> {
        match &self.kind {
            NodeKind::Leaf { v, .. } | NodeKind::Internal { v, .. } => Some(v),
            NodeKind::Bucket { .. } => None,
        }
    }

    /// Child ids: the two subtrees of an internal node or a bucket's items.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Leaf { .. } => &[],
            NodeKind::Bucket { items } => items,
            NodeKind::Internal { children, .. } => children,
        }
    }
}
