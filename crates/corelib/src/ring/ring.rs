//! Wheel-based consistent hash.
//!
//! Members (or their virtual nodes) are hashed onto a wheel of
//! [`HASH_SPACE`] slots. A key's owners are found by walking clockwise from
//! the key's slot and collecting distinct members. Simpler and less evenly
//! balanced than the segment-list hashes; kept for deployments that need the
//! wheel layout.

use super::position::RingPositions;
use crate::ch::ConsistentHash;
use crate::error::{Error, Result};
use crate::hash::HashFunction;
use crate::node::NodeId;
use crate::topology::{Locations, TopologyInfo};
use crate::vnode::NodeRef;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// Number of slots on the wheel.
pub const HASH_SPACE: u32 = 10240;

/// Immutable wheel of member positions.
///
/// Members are kept sorted by id and inserted in that order, so every node
/// that builds a wheel from the same member set gets the same positions.
#[derive(Debug, Clone)]
pub struct WheelConsistentHash {
    hash_function: HashFunction,
    num_owners: usize,
    num_virtual_nodes: u32,
    members: Vec<NodeId>,
    positions: RingPositions,
    /// Position of each member's first reference, aligned with `members`.
    anchors: Vec<u32>,
    /// Present for a topology-aware wheel, aligned with `members`.
    locations: Option<Locations>,
}

impl WheelConsistentHash {
    pub fn builder() -> RingBuilder {
        RingBuilder::new()
    }

    pub fn num_virtual_nodes(&self) -> u32 {
        self.num_virtual_nodes
    }

    pub fn positions(&self) -> &RingPositions {
        &self.positions
    }

    pub fn is_topology_aware(&self) -> bool {
        self.locations.is_some()
    }

    /// Wheel slot of `key`.
    pub fn hash_id(&self, key: &[u8]) -> u32 {
        self.hash_function.normalized_hash(key) % self.positions.hash_space()
    }

    fn member_index(&self, node: &NodeId) -> Option<usize> {
        self.members.binary_search(node).ok()
    }

    /// Owners of the wheel slot `position`.
    ///
    /// Without topology this is the first `repl_count` distinct members
    /// clockwise. With topology the first member is always kept and the
    /// rest are chosen in passes of decreasing diversity over the same
    /// clockwise order.
    pub fn owners_at(&self, position: u32, repl_count: usize) -> Vec<NodeId> {
        let mut walk: Vec<NodeId> = Vec::new();
        for (_, node) in self.positions.clockwise_from(position) {
            let real = node.real();
            if walk.contains(&real) {
                continue;
            }
            walk.push(real);
            if self.locations.is_none() && walk.len() >= repl_count {
                break;
            }
            if walk.len() == self.members.len() {
                break;
            }
        }

        match &self.locations {
            None => {
                walk.truncate(repl_count);
                walk
            }
            Some(locations) => {
                let candidates: Vec<usize> = walk
                    .iter()
                    .filter_map(|node| self.member_index(node))
                    .collect();
                locations
                    .pick_diverse(&candidates, repl_count)
                    .into_iter()
                    .map(|idx| self.members[idx])
                    .collect()
            }
        }
    }

    /// Owners of `node`'s own wheel position; `node` comes first.
    pub fn locate_node(&self, node: &NodeId, repl_count: usize) -> Result<Vec<NodeId>> {
        let idx = self.member_index(node).ok_or(Error::UnknownNode(*node))?;
        Ok(self.owners_at(self.anchors[idx], repl_count))
    }

    /// True if `a` and `b` are next to each other in wheel order (either
    /// direction), ordering members by their first position.
    pub fn is_adjacent(&self, a: &NodeId, b: &NodeId) -> bool {
        if a == b || self.members.len() < 2 {
            return false;
        }
        let mut order: Vec<(u32, NodeId)> = self
            .anchors
            .iter()
            .copied()
            .zip(self.members.iter().copied())
            .collect();
        order.sort_unstable();
        let index_of = |node: &NodeId| order.iter().position(|(_, n)| n == node);
        match (index_of(a), index_of(b)) {
            (Some(i), Some(j)) => {
                let distance = i.abs_diff(j);
                distance == 1 || distance == order.len() - 1
            }
            _ => false,
        }
    }

    /// Members next to `node` on the wheel, or [`Error::UnknownNode`].
    fn neighbours(&self, node: &NodeId) -> Result<BTreeSet<NodeId>> {
        self.member_index(node).ok_or(Error::UnknownNode(*node))?;
        Ok(self
            .members
            .iter()
            .filter(|member| self.is_adjacent(member, node))
            .copied()
            .collect())
    }

    /// Members whose own position replicates onto `node`.
    fn replicating_onto(&self, node: &NodeId, repl_count: usize) -> Result<BTreeSet<NodeId>> {
        let mut out = BTreeSet::new();
        for member in self.members.iter().filter(|member| *member != node) {
            if self.locate_node(member, repl_count)?.contains(node) {
                out.insert(*member);
            }
        }
        Ok(out)
    }

    /// Members that must supply state when `leaver` goes away.
    ///
    /// These are the leaver's wheel neighbours: its predecessor replicates
    /// onto it and its successor holds the first backup of its range. With
    /// more than two owners, members further back that still replicate onto
    /// `leaver` are added too.
    pub fn state_providers_on_leave(
        &self,
        leaver: &NodeId,
        repl_count: usize,
    ) -> Result<BTreeSet<NodeId>> {
        let mut providers = self.neighbours(leaver)?;
        providers.extend(self.replicating_onto(leaver, repl_count)?);
        trace!(%leaver, providers = providers.len(), "state providers on leave");
        Ok(providers)
    }

    /// Members that must supply state to `joiner` (already on the wheel).
    ///
    /// Starts from the joiner's wheel neighbours, then adds the members that
    /// owned its range before it joined and every member whose position now
    /// replicates onto it.
    pub fn state_providers_on_join(
        &self,
        joiner: &NodeId,
        repl_count: usize,
    ) -> Result<BTreeSet<NodeId>> {
        let mut providers = self.neighbours(joiner)?;
        providers.extend(
            self.locate_node(joiner, repl_count + 1)?
                .into_iter()
                .filter(|node| node != joiner),
        );
        providers.extend(self.replicating_onto(joiner, repl_count)?);
        trace!(%joiner, providers = providers.len(), "state providers on join");
        Ok(providers)
    }
}

impl ConsistentHash for WheelConsistentHash {
    fn num_segments(&self) -> usize {
        self.positions.hash_space() as usize
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
        self.member_index(node).map(|_| 1.0)
    }

    fn locate_owners_for_segment(&self, segment: usize) -> Vec<NodeId> {
        assert!(segment < self.num_segments(), "segment {segment} out of range");
        self.owners_at(segment as u32, self.num_owners)
    }

    fn locate(&self, key: &[u8], repl_count: usize) -> Vec<NodeId> {
        self.owners_at(self.hash_id(key), repl_count)
    }
}

/// Builder for [`WheelConsistentHash`].
#[derive(Debug, Clone)]
pub struct RingBuilder {
    hash_function: HashFunction,
    num_owners: usize,
    num_virtual_nodes: u32,
    hash_space: u32,
    members: Vec<NodeId>,
    topology: Option<Arc<TopologyInfo>>,
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuilder {
    /// SipHash13, two owners, one position per member.
    pub fn new() -> Self {
        Self {
            hash_function: HashFunction::default(),
            num_owners: 2,
            num_virtual_nodes: 1,
            hash_space: HASH_SPACE,
            members: Vec::new(),
            topology: None,
        }
    }

    pub fn with_hash_function(mut self, hash_function: HashFunction) -> Self {
        self.hash_function = hash_function;
        self
    }

    pub fn with_owners(mut self, num_owners: usize) -> Self {
        self.num_owners = num_owners;
        self
    }

    pub fn with_vnodes(mut self, num_virtual_nodes: u32) -> Self {
        self.num_virtual_nodes = num_virtual_nodes;
        self
    }

    /// Overrides [`HASH_SPACE`]; only useful for tests on tiny wheels.
    pub fn with_hash_space(mut self, hash_space: u32) -> Self {
        self.hash_space = hash_space;
        self
    }

    pub fn with_topology(mut self, topology: Arc<TopologyInfo>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn add_member(mut self, node: NodeId) -> Self {
        self.members.push(node);
        self
    }

    pub fn with_members(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.members.extend(nodes);
        self
    }

    pub fn build(self) -> Result<WheelConsistentHash> {
        if self.num_owners == 0 {
            return Err(Error::InvalidConfiguration(
                "the number of owners should be greater than 0".into(),
            ));
        }
        if self.hash_space == 0 {
            return Err(Error::InvalidConfiguration("hash space must not be empty".into()));
        }
        let mut members = self.members;
        members.sort_unstable();
        members.dedup();
        if members.is_empty() {
            return Err(Error::InvalidConfiguration(
                "can't construct a consistent hash without any members".into(),
            ));
        }

        let locations = match &self.topology {
            Some(topology) => Some(topology.locations_for(&members)?),
            None => None,
        };

        let mut positions = RingPositions::new(self.hash_space);
        let mut anchors = Vec::with_capacity(members.len());
        for member in &members {
            let mut first = None;
            for node in NodeRef::for_member(*member, self.num_virtual_nodes) {
                let position = positions.insert(self.hash_function, node)?;
                first.get_or_insert(position);
            }
            anchors.extend(first);
        }

        trace!(
            members = members.len(),
            positions = positions.len(),
            "built hash wheel"
        );
        Ok(WheelConsistentHash {
            hash_function: self.hash_function,
            num_owners: self.num_owners,
            num_virtual_nodes: self.num_virtual_nodes.max(1),
            members,
            positions,
            anchors,
            locations,
        })
    }
}
