//! Consistent hash backed by an explicit owner list per segment.

use super::{CapacityFactors, ConsistentHash};
use crate::error::{Error, Result};
use crate::hash::HashFunction;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Immutable segment → owner-list mapping.
///
/// The serialized form (`hash_function`, `num_owners`, `members`,
/// `capacity_factors`, `segment_owners`) is the wire contract: a remote node
/// that decodes it reconstructs an identical instance.
///
/// Equality only looks at the member list and the owner lists (primary
/// sensitive). Factories rely on it to detect a rebalance that changed
/// nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefaultConsistentHash {
    hash_function: HashFunction,
    num_owners: usize,
    members: Vec<NodeId>,
    /// Aligned with `members`.
    capacity_factors: Option<Vec<f32>>,
    segment_owners: Vec<Vec<NodeId>>,
}

impl DefaultConsistentHash {
    /// Builds a hash from explicit owner lists, checking the structural
    /// invariants: members unique, every owner a member, no duplicate owner
    /// within a segment.
    pub fn new(
        hash_function: HashFunction,
        num_owners: usize,
        members: Vec<NodeId>,
        capacity_factors: Option<&CapacityFactors>,
        segment_owners: Vec<Vec<NodeId>>,
    ) -> Result<Self> {
        let capacity_factors = match capacity_factors {
            Some(factors) => Some(
                members
                    .iter()
                    .map(|node| {
                        factors.get(node).copied().ok_or_else(|| {
                            Error::InvalidConfiguration(format!(
                                "no capacity factor for member {node}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        let ch = Self {
            hash_function,
            num_owners,
            members,
            capacity_factors,
            segment_owners,
        };
        ch.validate()?;
        Ok(ch)
    }

    fn validate(&self) -> Result<()> {
        if self.num_owners == 0 {
            return Err(Error::InvalidConfiguration(
                "the number of owners should be greater than 0".into(),
            ));
        }
        if self.segment_owners.is_empty() {
            return Err(Error::InvalidConfiguration(
                "the number of segments should be greater than 0".into(),
            ));
        }
        let members: HashSet<&NodeId> = self.members.iter().collect();
        if members.len() != self.members.len() {
            return Err(Error::InvalidConfiguration("duplicate member".into()));
        }
        if let Some(factors) = &self.capacity_factors {
            if factors.len() != self.members.len() {
                return Err(Error::InvalidConfiguration(
                    "capacity factors do not match the member list".into(),
                ));
            }
        }
        for (segment, owners) in self.segment_owners.iter().enumerate() {
            let mut seen = HashSet::with_capacity(owners.len());
            for owner in owners {
                if !members.contains(owner) {
                    return Err(Error::InvalidConfiguration(format!(
                        "segment {segment} owner {owner} is not a member"
                    )));
                }
                if !seen.insert(owner) {
                    return Err(Error::InvalidConfiguration(format!(
                        "segment {segment} lists owner {owner} twice"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Capacity factors keyed by member, if the hash carries any.
    pub fn capacity_factors(&self) -> Option<CapacityFactors> {
        self.capacity_factors.as_ref().map(|factors| {
            self.members
                .iter()
                .copied()
                .zip(factors.iter().copied())
                .collect()
        })
    }

    /// Borrowed owner list of `segment`. The hash is immutable, so handing
    /// out a slice is as safe as a copy.
    pub fn owners(&self, segment: usize) -> &[NodeId] {
        &self.segment_owners[segment]
    }

    /// All owner lists, indexed by segment.
    pub fn segment_owners(&self) -> &[Vec<NodeId>] {
        &self.segment_owners
    }

    /// Merges two hashes over the same segments.
    ///
    /// For every segment the owners of `self` keep their order (so the
    /// primary of `self` stays primary) and the owners of `other` that are
    /// not already present are appended as backups. The result may carry
    /// more than `num_owners` owners per segment.
    pub fn union(&self, other: &DefaultConsistentHash) -> Result<DefaultConsistentHash> {
        if self.hash_function != other.hash_function {
            return Err(Error::InvalidConfiguration(format!(
                "cannot merge hashes using {} and {}",
                self.hash_function.name(),
                other.hash_function.name()
            )));
        }
        if self.num_segments() != other.num_segments() {
            return Err(Error::InvalidConfiguration(format!(
                "cannot merge hashes with {} and {} segments",
                self.num_segments(),
                other.num_segments()
            )));
        }

        let mut members = self.members.clone();
        for node in &other.members {
            if !members.contains(node) {
                members.push(*node);
            }
        }

        let capacity_factors = match (self.capacity_factors(), other.capacity_factors()) {
            (Some(mut mine), Some(theirs)) => {
                for (node, factor) in theirs {
                    mine.entry(node).or_insert(factor);
                }
                Some(mine)
            }
            _ => None,
        };

        let segment_owners = self
            .segment_owners
            .iter()
            .zip(&other.segment_owners)
            .map(|(mine, theirs)| {
                let mut owners = mine.clone();
                for node in theirs {
                    if !owners.contains(node) {
                        owners.push(*node);
                    }
                }
                owners
            })
            .collect();

        DefaultConsistentHash::new(
            self.hash_function,
            self.num_owners.max(other.num_owners),
            members,
            capacity_factors.as_ref(),
            segment_owners,
        )
    }

    /// Encodes the wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes the wire form and re-checks the structural invariants.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let ch: DefaultConsistentHash = bincode::deserialize(bytes)?;
        ch.validate()?;
        Ok(ch)
    }
}

impl ConsistentHash for DefaultConsistentHash {
    fn num_segments(&self) -> usize {
        self.segment_owners.len()
    }

    fn num_owners(&self) -> usize {
        self.num_owners
    }

    fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    fn members(&self) -> &[NodeId] {
        &self.members
    }

    fn capacity_factor(&self, node: &NodeId) -> Option<f32> {
        let idx = self.members.iter().position(|m| m == node)?;
        Some(
            self.capacity_factors
                .as_ref()
                .map_or(1.0, |factors| factors[idx]),
        )
    }

    fn locate_owners_for_segment(&self, segment: usize) -> Vec<NodeId> {
        self.segment_owners[segment].clone()
    }

    fn locate_primary_owner_for_segment(&self, segment: usize) -> Option<NodeId> {
        self.segment_owners[segment].first().copied()
    }
}

impl PartialEq for DefaultConsistentHash {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members && self.segment_owners == other.segment_owners
    }
}

impl Eq for DefaultConsistentHash {}

impl fmt::Display for DefaultConsistentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DefaultConsistentHash{{ns={}, owners={}, members={}}}",
            self.num_segments(),
            self.num_owners,
            self.members.len()
        )
    }
}
