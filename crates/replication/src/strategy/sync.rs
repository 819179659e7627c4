//! Position-derived owner assignment.
//!
//! Owners come only from hashes of `(member, virtual node index)`, never
//! from the previous assignment, so nodes that compute a hash on their own
//! for the same members (after a partition heals, say) get the same result.
//!
//! # Algorithm
//!
//! 1. Order members by capacity factor (descending), then id.
//! 2. Give each member `cf / total * N * sqrt(S)` virtual nodes (at least
//!    one if it has load); `sqrt(S)` keeps the spread even without the cost
//!    growing linearly with the segment count.
//! 3. Hash each virtual node onto `[0, i32::MAX]`, divide by the segment
//!    size and probe forward on collision. The member that lands on a
//!    segment is its anchor. Virtual nodes are placed round-robin across
//!    members so no member is starved when segments run out.
//! 4. With at least as many segments as members, owners of a segment are the
//!    next distinct anchors clockwise. Otherwise the anchor is the primary and
//!    backups follow it in member order.

use crate::builder::SegmentBuilder;
use crate::error::{ReplicationError, Result};
use crate::strategy::{self, ConsistentHashFactory, OrphanSource};
use corelib::hash::normalize;
use corelib::{
    CapacityFactors, ConsistentHash, DefaultConsistentHash, HashFunction, NodeId, TopologyInfo,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

const MAX_POSITION: u64 = i32::MAX as u64;

/// Deterministic factory for [`DefaultConsistentHash`].
#[derive(Debug, Clone, Default)]
pub struct SyncConsistentHashFactory {
    topology: Option<Arc<TopologyInfo>>,
}

impl SyncConsistentHashFactory {
    pub fn new() -> Self {
        Self { topology: None }
    }

    /// Picks owners on distinct sites, then racks, then machines where the
    /// candidate order allows it.
    pub fn topology_aware(topology: Arc<TopologyInfo>) -> Self {
        Self {
            topology: Some(topology),
        }
    }

    pub fn is_topology_aware(&self) -> bool {
        self.topology.is_some()
    }

    fn assign(&self, builder: &mut SegmentBuilder) -> Result<()> {
        if builder.num_nodes_with_load() == 0 {
            return Err(ReplicationError::InvalidConfiguration(
                "no member has a non-zero capacity factor".into(),
            ));
        }
        let locations = match &self.topology {
            Some(topology) => Some(topology.locations_for(builder.members())?),
            None => None,
        };

        let order = sorted_members(builder);
        let anchors = anchor_segments(builder, &order);
        let num_segments = builder.num_segments();
        let actual = builder.actual_num_owners();
        let walk_ring = num_segments >= builder.num_nodes_with_load();
        trace!(anchors = anchors.len(), walk_ring, "placed virtual nodes");

        for segment in 0..num_segments {
            let candidates = if walk_ring {
                ring_walk(&anchors, segment)
            } else {
                member_walk(&anchors, &order, segment)?
            };
            let owners = match &locations {
                Some(locations) => locations.pick_diverse(&candidates, actual),
                None => candidates.into_iter().take(actual).collect(),
            };
            builder.add_owners(segment, &owners);
        }
        Ok(())
    }
}

/// Loaded members, highest capacity first, ties by id.
fn sorted_members(builder: &SegmentBuilder) -> Vec<usize> {
    let mut order: Vec<usize> = builder.loaded_members().collect();
    order.sort_by(|&a, &b| {
        builder
            .capacity_factor(b)
            .total_cmp(&builder.capacity_factor(a))
            .then_with(|| builder.member(a).cmp(&builder.member(b)))
    });
    order
}

/// Anchor member of each segment that received a virtual node.
fn anchor_segments(builder: &SegmentBuilder, order: &[usize]) -> BTreeMap<usize, usize> {
    let num_segments = builder.num_segments();
    let hash_function = builder.hash_function();
    let total_capacity: f64 = order
        .iter()
        .map(|&idx| f64::from(builder.capacity_factor(idx)))
        .sum();
    let scale = order.len() as f64 * (num_segments as f64).sqrt();
    let virtual_nodes: Vec<usize> = order
        .iter()
        .map(|&idx| {
            let share = f64::from(builder.capacity_factor(idx)) / total_capacity;
            ((share * scale).round() as usize).max(1)
        })
        .collect();
    let member_hashes: Vec<i32> = order
        .iter()
        .map(|&idx| hash_function.hash(&builder.member(idx).to_bytes()))
        .collect();

    let segment_size = MAX_POSITION.div_ceil(num_segments as u64);
    let max_virtual_nodes = virtual_nodes.iter().copied().max().unwrap_or(0);
    let mut anchors = BTreeMap::new();
    'placing: for vnode in 0..max_virtual_nodes {
        for (i, &idx) in order.iter().enumerate() {
            if vnode >= virtual_nodes[i] {
                continue;
            }
            if anchors.len() == num_segments {
                break 'placing;
            }
            let rehashed = hash_function.hash_int(member_hashes[i].wrapping_add(vnode as i32));
            let position = normalize(rehashed);
            let mut segment = ((u64::from(position) / segment_size) as usize).min(num_segments - 1);
            while anchors.contains_key(&segment) {
                segment = (segment + 1) % num_segments;
            }
            anchors.insert(segment, idx);
        }
    }
    anchors
}

/// Distinct anchors clockwise from `segment`, wrapping once.
fn ring_walk(anchors: &BTreeMap<usize, usize>, segment: usize) -> Vec<usize> {
    let mut walk = Vec::new();
    for (_, &member) in anchors.range(segment..).chain(anchors.range(..segment)) {
        if !walk.contains(&member) {
            walk.push(member);
        }
    }
    walk
}

/// The anchor of `segment`, then every other member in sorted order,
/// starting after the anchor and wrapping.
fn member_walk(
    anchors: &BTreeMap<usize, usize>,
    order: &[usize],
    segment: usize,
) -> Result<Vec<usize>> {
    let primary = *anchors.get(&segment).ok_or_else(|| {
        ReplicationError::InconsistentState(format!("segment {segment} has no anchor"))
    })?;
    let start = order.iter().position(|&idx| idx == primary).unwrap_or(0);
    let mut walk = Vec::with_capacity(order.len());
    walk.push(primary);
    walk.extend(
        order[start + 1..]
            .iter()
            .chain(&order[..start])
            .copied()
            .filter(|&idx| idx != primary),
    );
    Ok(walk)
}

impl ConsistentHashFactory for SyncConsistentHashFactory {
    type Hash = DefaultConsistentHash;

    fn create(
        &self,
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<DefaultConsistentHash>> {
        strategy::create_segments(
            self.name(),
            &|builder: &mut SegmentBuilder| self.assign(builder),
            hash_function,
            num_owners,
            num_segments,
            members,
            capacity_factors,
        )
    }

    fn update_members(
        &self,
        base: &Arc<DefaultConsistentHash>,
        new_members: &[NodeId],
        capacity_factors: Option<&CapacityFactors>,
    ) -> Result<Arc<DefaultConsistentHash>> {
        strategy::update_segment_members(
            self.name(),
            &|builder: &mut SegmentBuilder| self.assign(builder),
            OrphanSource::Fresh,
            base,
            new_members,
            capacity_factors,
        )
    }

    /// Recomputes from scratch: the result depends only on the members.
    fn rebalance(&self, base: &Arc<DefaultConsistentHash>) -> Result<Arc<DefaultConsistentHash>> {
        let factors = base.capacity_factors();
        let mut builder = SegmentBuilder::new(
            base.hash_function(),
            base.num_owners(),
            base.num_segments(),
            base.members(),
            factors.as_ref(),
        );
        self.assign(&mut builder)?;
        Ok(strategy::publish_rebalance(self.name(), base, builder.build()?))
    }

    fn union(
        &self,
        first: &DefaultConsistentHash,
        second: &DefaultConsistentHash,
    ) -> Result<Arc<DefaultConsistentHash>> {
        strategy::union_segments(first, second)
    }

    fn name(&self) -> &'static str {
        if self.topology.is_some() {
            "topology-aware-sync"
        } else {
            "sync"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: u128) -> Vec<NodeId> {
        (1..=n).map(|i| NodeId(i * 1_000_003)).collect()
    }

    #[test]
    fn test_owners_do_not_depend_on_member_order() {
        let members = nodes(5);
        let mut reversed = members.clone();
        reversed.reverse();

        let factory = SyncConsistentHashFactory::new();
        let a = factory.create(HashFunction::SipHash13, 2, 32, &members, None).unwrap();
        let b = factory.create(HashFunction::SipHash13, 2, 32, &reversed, None).unwrap();
        assert_eq!(a.segment_owners(), b.segment_owners());
    }

    #[test]
    fn test_every_segment_gets_owners() {
        for segments in [1, 3, 7, 64] {
            let ch = SyncConsistentHashFactory::new()
                .create(HashFunction::Xxh3, 3, segments, &nodes(5), None)
                .unwrap();
            for segment in 0..segments {
                assert_eq!(ch.locate_owners_for_segment(segment).len(), 3);
            }
        }
    }

    #[test]
    fn test_rebalance_of_fresh_hash_is_noop() {
        let factory = SyncConsistentHashFactory::new();
        let ch = factory.create(HashFunction::SipHash13, 2, 16, &nodes(4), None).unwrap();
        let again = factory.rebalance(&ch).unwrap();
        assert!(Arc::ptr_eq(&ch, &again));
    }

    #[test]
    fn test_zero_capacity_member_is_skipped() {
        let members = nodes(3);
        let factors: CapacityFactors = members
            .iter()
            .enumerate()
            .map(|(i, node)| (*node, if i == 0 { 0.0 } else { 1.0 }))
            .collect();
        let ch = SyncConsistentHashFactory::new()
            .create(HashFunction::SipHash13, 2, 2, &members, Some(&factors))
            .unwrap();
        assert!(ch.segments_for_owner(&members[0]).is_empty());
    }
}
