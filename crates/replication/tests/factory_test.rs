//! Tests for the consistent hash factories.
//!
//! # Test Strategy
//!
//! 1. **Creation**: owner counts, balance, concrete scenarios
//! 2. **Membership changes**: leavers, joiners, no-op detection
//! 3. **Rebalance**: balance bounds, idempotence
//! 4. **Sync**: determinism
//! 5. **Topology**: diversity across sites
//! 6. **Properties**: randomized membership histories

use corelib::{
    CapacityFactors, ConsistentHash, DefaultConsistentHash, HashFunction, NodeId, NodeTopologyInfo,
    TopologyInfo, UnionConsistentHash,
};
use proptest::prelude::*;
use replication::{
    ConsistentHashFactory, DefaultConsistentHashFactory, OwnershipStatistics, ReplicationError,
    SyncConsistentHashFactory, TopologyAwareConsistentHashFactory,
};
use std::collections::HashSet;
use std::sync::Arc;

fn nodes(n: usize) -> Vec<NodeId> {
    (0..n).map(|i| NodeId::from_name(&format!("node-{i}"))).collect()
}

/// Asserts the primary-owned and owned bounds for every member.
fn assert_balanced(ch: &DefaultConsistentHash) {
    let members = ch.members().len();
    let segments = ch.num_segments();
    let owners = ch.num_owners().min(members);
    let stats = OwnershipStatistics::for_hash(ch);

    let (min_primary, max_primary) = (segments / members, segments.div_ceil(members));
    let min_owned = owners * segments / members;
    let max_owned = (owners * segments).div_ceil(members);
    for (idx, node) in ch.members().iter().enumerate() {
        let primary = stats.primary_owned(idx);
        let owned = stats.owned(idx);
        assert!(
            (min_primary..=max_primary).contains(&primary),
            "{node} primary-owns {primary}, expected {min_primary}..={max_primary}"
        );
        assert!(
            (min_owned..=max_owned).contains(&owned),
            "{node} owns {owned}, expected {min_owned}..={max_owned}"
        );
    }
}

fn assert_owner_counts(ch: &DefaultConsistentHash) {
    let expected = ch.num_owners().min(ch.members().len());
    for segment in 0..ch.num_segments() {
        assert_eq!(
            ch.locate_owners_for_segment(segment).len(),
            expected,
            "segment {segment} has the wrong number of owners"
        );
    }
}

// ============================================================================
// Creation Tests
// ============================================================================

#[test]
fn test_four_nodes_eight_segments() {
    // 8 segments over 4 nodes: 2 primaries and 4 owned segments each
    let members = nodes(4);
    let ch = DefaultConsistentHashFactory
        .create(HashFunction::SipHash13, 2, 8, &members, None)
        .unwrap();

    let stats = OwnershipStatistics::for_hash(&*ch);
    for node in &members {
        assert_eq!(stats.primary_owned_by(node), Some(2));
        assert_eq!(stats.owned_by(node), Some(4));
    }
    assert_owner_counts(&ch);
}

#[test]
fn test_create_is_balanced() {
    for (n, segments, owners) in [(3, 10, 2), (5, 8, 2), (7, 60, 3), (2, 1, 2), (10, 256, 2)] {
        let ch = DefaultConsistentHashFactory
            .create(HashFunction::SipHash13, owners, segments, &nodes(n), None)
            .unwrap();
        assert_owner_counts(&ch);
        assert_balanced(&ch);
    }
}

#[test]
fn test_invalid_configuration_rejected() {
    let factory = DefaultConsistentHashFactory;
    let members = nodes(3);

    assert!(matches!(
        factory.create(HashFunction::SipHash13, 0, 8, &members, None),
        Err(ReplicationError::InvalidConfiguration(_))
    ));
    assert!(factory.create(HashFunction::SipHash13, 2, 0, &members, None).is_err());
    assert!(factory.create(HashFunction::SipHash13, 2, 8, &[], None).is_err());

    let duplicated = [members[0], members[0]];
    assert!(factory.create(HashFunction::SipHash13, 2, 8, &duplicated, None).is_err());

    // Negative, missing, or all-zero capacity factors
    let negative: CapacityFactors = members.iter().map(|n| (*n, -1.0)).collect();
    assert!(factory.create(HashFunction::SipHash13, 2, 8, &members, Some(&negative)).is_err());
    let missing: CapacityFactors = members.iter().take(2).map(|n| (*n, 1.0)).collect();
    assert!(factory.create(HashFunction::SipHash13, 2, 8, &members, Some(&missing)).is_err());
    let zero: CapacityFactors = members.iter().map(|n| (*n, 0.0)).collect();
    assert!(factory.create(HashFunction::SipHash13, 2, 8, &members, Some(&zero)).is_err());
}

// ============================================================================
// Membership Change Tests
// ============================================================================

#[test]
fn test_update_members_same_members_is_noop() {
    let factory = DefaultConsistentHashFactory;
    let members = nodes(4);
    let ch = factory.create(HashFunction::SipHash13, 2, 16, &members, None).unwrap();

    let same = factory.update_members(&ch, &members, None).unwrap();
    assert!(Arc::ptr_eq(&ch, &same), "Unchanged membership must return the same instance");
}

#[test]
fn test_leavers_are_removed() {
    let factory = DefaultConsistentHashFactory;
    let members = nodes(5);
    let ch = factory.create(HashFunction::SipHash13, 2, 20, &members, None).unwrap();

    // Two members leave at once, so some segments lose both owners
    let remaining = vec![members[0], members[2], members[4]];
    let updated = factory.update_members(&ch, &remaining, None).unwrap();

    for segment in 0..updated.num_segments() {
        let owners = updated.locate_owners_for_segment(segment);
        assert!(!owners.is_empty(), "segment {segment} has no owners");
        assert!(owners.iter().all(|o| remaining.contains(o)));
        // Surviving owners keep their segments
        for owner in ch.locate_owners_for_segment(segment) {
            if remaining.contains(&owner) {
                assert!(owners.contains(&owner));
            }
        }
    }

    let balanced = factory.rebalance(&updated).unwrap();
    assert_owner_counts(&balanced);
    assert_balanced(&balanced);
}

#[test]
fn test_orphaned_segments_keep_owners_through_rebalance() {
    let factory = DefaultConsistentHashFactory;
    let mut orphaned_total = 0;
    for n in 4..=8 {
        for segments in [16, 32, 60] {
            let members = nodes(n);
            let ch = factory.create(HashFunction::SipHash13, 2, segments, &members, None).unwrap();
            let remaining = members[2..].to_vec();
            let orphaned: Vec<usize> = (0..segments)
                .filter(|&s| {
                    ch.locate_owners_for_segment(s)
                        .iter()
                        .all(|owner| !remaining.contains(owner))
                })
                .collect();
            orphaned_total += orphaned.len();

            let updated = factory.update_members(&ch, &remaining, None).unwrap();
            let balanced = factory.rebalance(&updated).unwrap();
            for segment in orphaned {
                assert_eq!(
                    balanced.locate_owners_for_segment(segment),
                    updated.locate_owners_for_segment(segment),
                    "n={n} segments={segments}: segment {segment} moved again on rebalance"
                );
            }
        }
    }
    assert!(orphaned_total > 0, "no segment lost all of its owners");
}

#[test]
fn test_joiner_gets_segments_after_rebalance() {
    let factory = DefaultConsistentHashFactory;
    let members = nodes(3);
    let ch = factory.create(HashFunction::SipHash13, 2, 12, &members, None).unwrap();

    let mut grown = members.clone();
    grown.push(NodeId::from_name("joiner"));
    let updated = factory.update_members(&ch, &grown, None).unwrap();
    // Nobody lost all owners, so the joiner gets nothing yet
    assert!(updated.segments_for_owner(&grown[3]).is_empty());

    let balanced = factory.rebalance(&updated).unwrap();
    assert_eq!(balanced.primary_segments_for_owner(&grown[3]).len(), 3);
    assert_eq!(balanced.segments_for_owner(&grown[3]).len(), 6);
    assert_balanced(&balanced);

    // During the transition both old and new owners hold the data
    let union = UnionConsistentHash::new(updated.clone(), balanced.clone()).unwrap();
    for i in 0..50 {
        let key = format!("key-{i}");
        let owners = union.locate(key.as_bytes(), 2);
        for owner in balanced.locate(key.as_bytes(), 2) {
            assert!(owners.contains(&owner));
        }
    }
}

#[test]
fn test_zero_capacity_change_moves_ownership_away() {
    let factory = DefaultConsistentHashFactory;
    let members = nodes(3);
    let ch = factory.create(HashFunction::SipHash13, 2, 9, &members, None).unwrap();

    let factors: CapacityFactors = members
        .iter()
        .enumerate()
        .map(|(i, n)| (*n, if i == 1 { 0.0 } else { 1.0 }))
        .collect();
    let updated = factory.update_members(&ch, &members, Some(&factors)).unwrap();
    assert!(updated.segments_for_owner(&members[1]).is_empty());
    assert_eq!(updated.capacity_factor(&members[1]), Some(0.0));
}

#[test]
fn test_factory_union_keeps_first_primary() {
    let factory = DefaultConsistentHashFactory;
    let a = factory.create(HashFunction::SipHash13, 2, 8, &nodes(3), None).unwrap();
    let b = factory.create(HashFunction::SipHash13, 2, 8, &nodes(4), None).unwrap();
    let union = factory.union(&a, &b).unwrap();

    for segment in 0..8 {
        let owners = union.locate_owners_for_segment(segment);
        assert_eq!(owners[0], a.locate_owners_for_segment(segment)[0]);
        for owner in b.locate_owners_for_segment(segment) {
            assert!(owners.contains(&owner));
        }
    }
}

// ============================================================================
// Rebalance Tests
// ============================================================================

#[test]
fn test_rebalance_of_balanced_hash_is_noop() {
    let factory = DefaultConsistentHashFactory;
    let ch = factory.create(HashFunction::SipHash13, 3, 30, &nodes(6), None).unwrap();
    let again = factory.rebalance(&ch).unwrap();
    assert!(Arc::ptr_eq(&ch, &again));
}

#[test]
fn test_rebalance_single_owner() {
    let factory = DefaultConsistentHashFactory;
    let ch = factory.create(HashFunction::SipHash13, 1, 7, &nodes(3), None).unwrap();
    assert_owner_counts(&ch);
    assert_balanced(&ch);
}

// ============================================================================
// Sync Tests
// ============================================================================

#[test]
fn test_sync_is_deterministic() {
    let members = nodes(6);
    let a = SyncConsistentHashFactory::new()
        .create(HashFunction::SipHash13, 2, 64, &members, None)
        .unwrap();
    let b = SyncConsistentHashFactory::new()
        .create(HashFunction::SipHash13, 2, 64, &members, None)
        .unwrap();
    assert_eq!(*a, *b);
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
}

#[test]
fn test_sync_leaver_removal() {
    let factory = SyncConsistentHashFactory::new();
    let members = nodes(4);
    let ch = factory.create(HashFunction::SipHash13, 2, 32, &members, None).unwrap();
    let remaining = &members[1..];
    let updated = factory.update_members(&ch, remaining, None).unwrap();
    for segment in 0..32 {
        let owners = updated.locate_owners_for_segment(segment);
        assert!(!owners.is_empty());
        assert!(!owners.contains(&members[0]));
    }
}

#[test]
fn test_sync_capacity_shifts_load() {
    let members = nodes(4);
    let factors: CapacityFactors = members
        .iter()
        .enumerate()
        .map(|(i, n)| (*n, if i == 0 { 4.0 } else { 1.0 }))
        .collect();
    let ch = SyncConsistentHashFactory::new()
        .create(HashFunction::SipHash13, 1, 256, &members, Some(&factors))
        .unwrap();
    let heavy = ch.segments_for_owner(&members[0]).len();
    let light = ch.segments_for_owner(&members[1]).len();
    assert!(heavy > light, "capacity 4.0 owns {heavy}, capacity 1.0 owns {light}");
}

// ============================================================================
// Topology Tests
// ============================================================================

fn three_sites() -> (Vec<NodeId>, Arc<TopologyInfo>) {
    let members = nodes(6);
    let mut topology = TopologyInfo::new();
    for (i, node) in members.iter().enumerate() {
        topology.insert(
            *node,
            NodeTopologyInfo::new(
                Some(format!("machine-{i}")),
                Some(format!("rack-{}", i / 2)),
                Some(format!("site-{}", i / 2)),
            ),
        );
    }
    (members, Arc::new(topology))
}

/// Sites spread round-robin: site-0 holds members 0 and 3, and so on.
fn round_robin_sites() -> (Vec<NodeId>, Arc<TopologyInfo>) {
    let members = nodes(6);
    let mut topology = TopologyInfo::new();
    for (i, node) in members.iter().enumerate() {
        topology.insert(
            *node,
            NodeTopologyInfo::new(
                Some(format!("machine-{i}")),
                Some(format!("rack-{}", i % 3)),
                Some(format!("site-{}", i % 3)),
            ),
        );
    }
    (members, Arc::new(topology))
}

/// Distinct (sites, racks, machines) covered by `nodes`.
fn domains(topology: &TopologyInfo, nodes: &[NodeId]) -> (usize, usize, usize) {
    let mut sites = HashSet::new();
    let mut racks = HashSet::new();
    let mut machines = HashSet::new();
    for node in nodes {
        let info = topology.get(node).unwrap();
        sites.insert(info.site_id.clone());
        racks.insert((info.site_id.clone(), info.rack_id.clone()));
        machines.insert((info.site_id.clone(), info.rack_id.clone(), info.machine_id.clone()));
    }
    (sites.len(), racks.len(), machines.len())
}

fn sites_of(topology: &TopologyInfo, owners: &[NodeId]) -> usize {
    domains(topology, owners).0
}

/// Every segment covers one site, rack and machine per owner, as far as
/// `members` offer them.
fn assert_all_locations(
    topology: &TopologyInfo,
    members: &[NodeId],
    ch: &DefaultConsistentHash,
    num_owners: usize,
) {
    let owners = num_owners.min(members.len());
    let (sites, racks, machines) = domains(topology, members);
    let expected = (sites.min(owners), racks.min(owners), machines.min(owners));
    for segment in 0..ch.num_segments() {
        let segment_owners = ch.locate_owners_for_segment(segment);
        assert_eq!(segment_owners.len(), owners);
        assert_eq!(
            domains(topology, &segment_owners),
            expected,
            "{} members, segment {segment}: {segment_owners:?}",
            members.len()
        );
    }
}

#[test]
fn test_three_owners_span_sites() {
    let (members, topology) = three_sites();
    let factory = TopologyAwareConsistentHashFactory::new(topology.clone());
    let ch = factory.create(HashFunction::SipHash13, 3, 24, &members, None).unwrap();

    for segment in 0..24 {
        let owners = ch.locate_owners_for_segment(segment);
        assert_eq!(owners.len(), 3);
        assert_eq!(sites_of(&topology, &owners), 3, "segment {segment}: {owners:?}");
    }
}

#[test]
fn test_two_owners_on_distinct_sites() {
    let (members, topology) = three_sites();
    let factory = TopologyAwareConsistentHashFactory::new(topology.clone());
    let ch = factory.create(HashFunction::SipHash13, 2, 12, &members, None).unwrap();

    for segment in 0..12 {
        let owners = ch.locate_owners_for_segment(segment);
        assert_eq!(sites_of(&topology, &owners), 2, "segment {segment}: {owners:?}");
    }
}

#[test]
fn test_growing_membership_covers_all_locations() {
    for (members, topology) in [three_sites(), round_robin_sites()] {
        let factory = TopologyAwareConsistentHashFactory::new(topology.clone());
        for num_owners in 1..=4 {
            for segments in [12, 60] {
                let mut ch = factory
                    .create(HashFunction::SipHash13, num_owners, segments, &members[..1], None)
                    .unwrap();
                assert_all_locations(&topology, &members[..1], &ch, num_owners);

                for size in 2..=members.len() {
                    let current = &members[..size];
                    ch = factory.update_members(&ch, current, None).unwrap();
                    ch = factory.rebalance(&ch).unwrap();
                    assert_all_locations(&topology, current, &ch, num_owners);
                }

                let full = factory
                    .create(HashFunction::SipHash13, num_owners, segments, &members, None)
                    .unwrap();
                assert_all_locations(&topology, &members, &full, num_owners);
            }
        }
    }
}

#[test]
fn test_topology_aware_sync_spans_sites() {
    let (members, topology) = three_sites();
    let factory = SyncConsistentHashFactory::topology_aware(topology.clone());
    let ch = factory.create(HashFunction::SipHash13, 3, 32, &members, None).unwrap();

    for segment in 0..32 {
        let owners = ch.locate_owners_for_segment(segment);
        assert_eq!(sites_of(&topology, &owners), 3, "segment {segment}: {owners:?}");
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_create_is_balanced(n in 1usize..8, segments in 1usize..48, owners in 1usize..4) {
        let ch = DefaultConsistentHashFactory
            .create(HashFunction::SipHash13, owners, segments, &nodes(n), None)
            .unwrap();
        assert_owner_counts(&ch);
        assert_balanced(&ch);
    }

    #[test]
    fn prop_rebalance_is_idempotent(n in 2usize..8, segments in 1usize..48, leave in 0usize..8) {
        let factory = DefaultConsistentHashFactory;
        let members = nodes(n);
        let ch = factory.create(HashFunction::Xxh3, 2, segments, &members, None).unwrap();

        let mut remaining = members.clone();
        remaining.remove(leave % n);
        remaining.push(NodeId::from_name("joiner"));
        let updated = factory.update_members(&ch, &remaining, None).unwrap();
        let once = factory.rebalance(&updated).unwrap();
        let twice = factory.rebalance(&once).unwrap();

        prop_assert_eq!(&*once, &*twice);
        prop_assert!(Arc::ptr_eq(&once, &twice));
        assert_balanced(&once);
    }

    #[test]
    fn prop_leavers_never_own(n in 2usize..8, segments in 1usize..48, leave in 0usize..8) {
        let factory = DefaultConsistentHashFactory;
        let members = nodes(n);
        let ch = factory.create(HashFunction::SipHash13, 2, segments, &members, None).unwrap();
        let leaver = members[leave % n];
        let remaining: Vec<NodeId> = members.iter().copied().filter(|m| *m != leaver).collect();

        let updated = factory.update_members(&ch, &remaining, None).unwrap();
        for segment in 0..segments {
            let owners = updated.locate_owners_for_segment(segment);
            prop_assert!(!owners.is_empty());
            prop_assert!(!owners.contains(&leaver));
        }
    }

    #[test]
    fn prop_segment_stable_across_changes(key in proptest::collection::vec(any::<u8>(), 0..32)) {
        let factory = DefaultConsistentHashFactory;
        let members = nodes(4);
        let ch = factory.create(HashFunction::SipHash13, 2, 16, &members, None).unwrap();
        let updated = factory.update_members(&ch, &members[..3], None).unwrap();
        let balanced = factory.rebalance(&updated).unwrap();

        prop_assert_eq!(ch.segment(&key), updated.segment(&key));
        prop_assert_eq!(ch.segment(&key), balanced.segment(&key));
    }

    #[test]
    fn prop_sync_determinism(n in 1usize..10, segments in 1usize..64, owners in 1usize..4) {
        let members = nodes(n);
        let a = SyncConsistentHashFactory::new()
            .create(HashFunction::SipHash13, owners, segments, &members, None)
            .unwrap();
        let b = SyncConsistentHashFactory::new()
            .create(HashFunction::SipHash13, owners, segments, &members, None)
            .unwrap();
        prop_assert_eq!(&*a, &*b);
        for segment in 0..segments {
            prop_assert_eq!(a.locate_owners_for_segment(segment).len(), owners.min(n));
        }
    }
}
