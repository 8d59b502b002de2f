//! Identifier types shared by the node store and its collaborators.

use serde::{Deserialize, Serialize};

/// Dense identifier of a node record.
///
/// Ids are assigned at creation time, start at 0, and are never reused.
/// On disk an id is a 4-byte signed integer, so the largest usable id is
/// `i32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Largest id representable in a record.
    pub const MAX: NodeId = NodeId(i32::MAX as u32);

    /// Returns the id as a slot index.
    pub fn index(&self) -> u64 {
        self.0 as u64
    }

    /// Returns the next id.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the on-disk representation.
    pub fn to_i32(self) -> i32 {
        self.0 as i32
    }

    /// Converts an on-disk value, rejecting negative ids.
    pub fn from_i32(value: i32) -> Option<Self> {
        (value >= 0).then_some(Self(value as u32))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Parent pointer of a node within one tree of the forest.
///
/// Node id 0 is a real node, so "no parent" is never spelled as zero.
/// The two sentinels are stored as negative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentRef {
    /// The node is the root of this tree.
    Root,
    /// The node is not a member of this tree.
    Detached,
    /// The node hangs below the given parent in this tree.
    Node(NodeId),
}

impl ParentRef {
    /// On-disk value for [`ParentRef::Root`].
    pub const ROOT_SENTINEL: i32 = -1;
    /// On-disk value for [`ParentRef::Detached`].
    pub const DETACHED_SENTINEL: i32 = -2;

    /// Returns the on-disk representation.
    pub fn to_i32(self) -> i32 {
        match self {
            ParentRef::Root => Self::ROOT_SENTINEL,
            ParentRef::Detached => Self::DETACHED_SENTINEL,
            ParentRef::Node(id) => id.to_i32(),
        }
    }

    /// Decodes an on-disk value. Returns `None` for unknown negative values.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            Self::ROOT_SENTINEL => Some(ParentRef::Root),
            Self::DETACHED_SENTINEL => Some(ParentRef::Detached),
            v => NodeId::from_i32(v).map(ParentRef::Node),
        }
    }

    /// Returns the parent id, if this is a real node.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ParentRef::Node(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<NodeId> for ParentRef {
    fn from(id: NodeId) -> Self {
        ParentRef::Node(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_conversions() {
        let id = NodeId(17);
        assert_eq!(id.index(), 17);
        assert_eq!(id.next(), NodeId(18));
        assert_eq!(id.to_i32(), 17);
        assert_eq!(NodeId::from_i32(17), Some(id));
        assert_eq!(NodeId::from_i32(-1), None);
        assert_eq!(NodeId::MAX.to_i32(), i32::MAX);
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(5).to_string(), "5");
    }

    #[test]
    fn test_parent_ref_sentinels() {
        assert_eq!(ParentRef::Root.to_i32(), -1);
        assert_eq!(ParentRef::Detached.to_i32(), -2);
        assert_eq!(ParentRef::from_i32(-1), Some(ParentRef::Root));
        assert_eq!(ParentRef::from_i32(-2), Some(ParentRef::Detached));
        assert_eq!(ParentRef::from_i32(-3), None);
    }

    #[test]
    fn test_parent_ref_zero_is_a_node() {
        assert_eq!(ParentRef::from_i32(0), Some(ParentRef::Node(NodeId(0))));
        assert_eq!(ParentRef::Node(NodeId(0)).to_i32(), 0);
        assert_eq!(ParentRef::Node(NodeId(0)).node(), Some(NodeId(0)));
        assert_eq!(ParentRef::Root.node(), None);
    }
}
