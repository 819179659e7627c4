//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! On the wheel each member may occupy several positions instead of one.
//! More positions smooth out the share of the wheel each member covers, at
//! the cost of a larger position table.
//!
//! A position is held by a [`NodeRef`]: either the member itself, or one of
//! its numbered virtual nodes. Lookups always unwrap to the real member
//! before returning, so callers never see a virtual node.

use crate::hash::HashFunction;
use crate::node::NodeId;
use std::fmt;

/// Holder of a single wheel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeRef {
    /// The member itself (one position per member).
    Real(NodeId),
    /// Virtual node `index` of member `real`.
    Virtual { real: NodeId, index: u32 },
}

impl NodeRef {
    /// The member behind this position.
    #[inline]
    pub fn real(&self) -> NodeId {
        match *self {
            NodeRef::Real(id) => id,
            NodeRef::Virtual { real, .. } => real,
        }
    }

    /// Bytes hashed to place this reference on the wheel.
    ///
    /// A real reference hashes exactly like its id, so locating a member's
    /// id as a key lands on that member's own position.
    pub fn hash_input(&self) -> Vec<u8> {
        match *self {
            NodeRef::Real(id) => id.to_bytes().to_vec(),
            NodeRef::Virtual { real, index } => {
                let mut bytes = real.to_bytes().to_vec();
                bytes.extend_from_slice(&index.to_be_bytes());
                bytes
            }
        }
    }

    /// Preferred (unprobed) wheel position in `[0, hash_space)`.
    pub fn preferred_position(&self, hash_function: HashFunction, hash_space: u32) -> u32 {
        hash_function.normalized_hash(&self.hash_input()) % hash_space
    }

    /// References for `node`: the node itself when `count <= 1`, otherwise
    /// `count` numbered virtual nodes.
    pub fn for_member(node: NodeId, count: u32) -> Vec<NodeRef> {
        if count <= 1 {
            vec![NodeRef::Real(node)]
        } else {
            (0..count)
                .map(|index| NodeRef::Virtual { real: node, index })
                .collect()
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Real(id) => write!(f, "{id}"),
            NodeRef::Virtual { real, index } => write!(f, "{real}#{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_vnode_is_the_member() {
        assert_eq!(NodeRef::for_member(NodeId(1), 1), vec![NodeRef::Real(NodeId(1))]);
        assert_eq!(NodeRef::for_member(NodeId(1), 0), vec![NodeRef::Real(NodeId(1))]);
    }

    #[test]
    fn test_vnodes_have_distinct_inputs() {
        let refs = NodeRef::for_member(NodeId(1), 3);
        assert_eq!(refs.len(), 3);
        assert_ne!(refs[0].hash_input(), refs[1].hash_input());
        assert!(refs.iter().all(|r| r.real() == NodeId(1)));
    }

    #[test]
    fn test_real_ref_hashes_like_its_id() {
        let id = NodeId(77);
        assert_eq!(NodeRef::Real(id).hash_input(), id.to_bytes().to_vec());
    }
}
