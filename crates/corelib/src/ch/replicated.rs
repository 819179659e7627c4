//! Fully replicated hash: a single segment owned by every member.

use super::{CapacityFactors, ConsistentHash};
use crate::error::{Error, Result};
use crate::hash::HashFunction;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Every member owns every key; the first member is the primary owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedConsistentHash {
    hash_function: HashFunction,
    members: Vec<NodeId>,
}

impl ReplicatedConsistentHash {
    pub fn new(hash_function: HashFunction, members: Vec<NodeId>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::InvalidConfiguration(
                "can't construct a consistent hash without any members".into(),
            ));
        }
        let mut unique = members.clone();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != members.len() {
            return Err(Error::InvalidConfiguration("duplicate member".into()));
        }
        Ok(Self {
            hash_function,
            members,
        })
    }

    /// Members of `self` followed by the members of `other` not already present.
    pub fn union(&self, other: &ReplicatedConsistentHash) -> Result<Self> {
        let mut members = self.members.clone();
        for node in &other.members {
            if !members.contains(node) {
                members.push(*node);
            }
        }
        Self::new(self.hash_function, members)
    }

    /// Replicated hashes never carry capacity factors.
    pub fn capacity_factors(&self) -> Option<CapacityFactors> {
        None
    }
}

impl ConsistentHash for ReplicatedConsistentHash {
    fn num_segments(&self) -> usize {
        1
    }

    fn num_owners(&self) -> usize {
        self.members.len()
    }

    fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    fn members(&self) -> &[NodeId] {
        &self.members
    }

    fn capacity_factor(&self, node: &NodeId) -> Option<f32> {
        self.members.contains(node).then_some(1.0)
    }

    fn locate_owners_for_segment(&self, segment: usize) -> Vec<NodeId> {
        assert_eq!(segment, 0, "a replicated hash has a single segment");
        self.members.clone()
    }

    fn segment(&self, _key: &[u8]) -> usize {
        0
    }

    fn is_key_local_to_node(&self, node: &NodeId, _key: &[u8]) -> bool {
        self.members.contains(node)
    }
}
