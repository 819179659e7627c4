//! Failure-domain metadata for topology-aware placement.
//!
//! Every member may carry a site, rack and machine label. The grouping is
//! hierarchical: two nodes are on the same rack only if they are on the same
//! site, and on the same machine only if they are on the same rack. A missing
//! label compares equal to another missing label.

use crate::error::{Error, Result};
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Location of a single node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeTopologyInfo {
    pub machine_id: Option<String>,
    pub rack_id: Option<String>,
    pub site_id: Option<String>,
}

impl NodeTopologyInfo {
    pub fn new(
        machine_id: impl Into<Option<String>>,
        rack_id: impl Into<Option<String>>,
        site_id: impl Into<Option<String>>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            rack_id: rack_id.into(),
            site_id: site_id.into(),
        }
    }

    pub fn same_site(&self, other: &Self) -> bool {
        self.site_id == other.site_id
    }

    pub fn same_rack(&self, other: &Self) -> bool {
        self.same_site(other) && self.rack_id == other.rack_id
    }

    pub fn same_machine(&self, other: &Self) -> bool {
        self.same_rack(other) && self.machine_id == other.machine_id
    }
}

/// Granularity at which two owners are required to differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TopologyLevel {
    Site,
    Rack,
    Machine,
    Node,
}

impl TopologyLevel {
    /// Levels from most to least diverse.
    pub const DESCENDING: [TopologyLevel; 4] = [
        TopologyLevel::Site,
        TopologyLevel::Rack,
        TopologyLevel::Machine,
        TopologyLevel::Node,
    ];
}

/// Locations of the cluster members, populated by the membership layer.
#[derive(Clone, Debug, Default)]
pub struct TopologyInfo {
    nodes: HashMap<NodeId, NodeTopologyInfo>,
}

impl TopologyInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or replaces) the location of `node`.
    pub fn insert(&mut self, node: NodeId, info: NodeTopologyInfo) {
        self.nodes.insert(node, info);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_node(mut self, node: NodeId, info: NodeTopologyInfo) -> Self {
        self.insert(node, info);
        self
    }

    /// Location of `node`, or [`Error::MissingTopology`].
    pub fn get(&self, node: &NodeId) -> Result<&NodeTopologyInfo> {
        self.nodes.get(node).ok_or(Error::MissingTopology(*node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn same_site(&self, a: &NodeId, b: &NodeId) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        Ok(self.get(a)?.same_site(self.get(b)?))
    }

    pub fn same_rack(&self, a: &NodeId, b: &NodeId) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        Ok(self.get(a)?.same_rack(self.get(b)?))
    }

    pub fn same_machine(&self, a: &NodeId, b: &NodeId) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        Ok(self.get(a)?.same_machine(self.get(b)?))
    }

    /// Resolves the location of every member up front.
    ///
    /// Fails on the first member without a location; silently treating it as
    /// co-located would defeat the diversity guarantee.
    pub fn locations_for(&self, members: &[NodeId]) -> Result<Locations> {
        let infos = members
            .iter()
            .map(|node| self.get(node).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Locations { infos })
    }
}

/// Count of distinct sites, racks and machines among a set of owners.
///
/// Ordered lexicographically, so a segment spread over more sites always
/// ranks higher than one that only spreads over more machines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Diversity {
    pub sites: usize,
    pub racks: usize,
    pub machines: usize,
}

/// Member locations indexed by position in a member list.
///
/// Comparisons are infallible because every member was resolved when this
/// value was built.
#[derive(Clone, Debug)]
pub struct Locations {
    infos: Vec<NodeTopologyInfo>,
}

impl Locations {
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn info(&self, idx: usize) -> &NodeTopologyInfo {
        &self.infos[idx]
    }

    /// True if members `a` and `b` differ at `level`.
    pub fn distinct_at(&self, a: usize, b: usize, level: TopologyLevel) -> bool {
        if a == b {
            return false;
        }
        let (x, y) = (&self.infos[a], &self.infos[b]);
        match level {
            TopologyLevel::Site => !x.same_site(y),
            TopologyLevel::Rack => !x.same_rack(y),
            TopologyLevel::Machine => !x.same_machine(y),
            TopologyLevel::Node => true,
        }
    }

    /// Distinct failure domains covered by `owners`.
    pub fn diversity(&self, owners: impl IntoIterator<Item = usize>) -> Diversity {
        let mut sites: Vec<&Option<String>> = Vec::new();
        let mut racks: Vec<(&Option<String>, &Option<String>)> = Vec::new();
        let mut machines: Vec<(&Option<String>, &Option<String>, &Option<String>)> = Vec::new();
        for idx in owners {
            let info = &self.infos[idx];
            let site = &info.site_id;
            let rack = (site, &info.rack_id);
            let machine = (site, &info.rack_id, &info.machine_id);
            if !sites.contains(&site) {
                sites.push(site);
            }
            if !racks.contains(&rack) {
                racks.push(rack);
            }
            if !machines.contains(&machine) {
                machines.push(machine);
            }
        }
        Diversity {
            sites: sites.len(),
            racks: racks.len(),
            machines: machines.len(),
        }
    }

    /// Picks up to `count` owners from `candidates`, in candidate order.
    ///
    /// The first candidate is always taken. Remaining slots are filled in
    /// passes of decreasing diversity: a candidate on a site none of the
    /// chosen owners use, then a new rack, then a new machine, and finally
    /// any candidate not chosen yet, so the result is as long as it can be.
    pub fn pick_diverse(&self, candidates: &[usize], count: usize) -> Vec<usize> {
        let mut owners: Vec<usize> = Vec::with_capacity(count);
        let Some(&first) = candidates.first() else {
            return owners;
        };
        if count == 0 {
            return owners;
        }
        owners.push(first);

        for level in TopologyLevel::DESCENDING {
            for &candidate in candidates {
                if owners.len() >= count {
                    return owners;
                }
                if owners.contains(&candidate) {
                    continue;
                }
                if owners.iter().all(|&o| self.distinct_at(o, candidate, level)) {
                    owners.push(candidate);
                }
            }
        }
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(machine: &str, rack: Option<&str>, site: Option<&str>) -> NodeTopologyInfo {
        NodeTopologyInfo::new(
            Some(machine.to_string()),
            rack.map(str::to_string),
            site.map(str::to_string),
        )
    }

    #[test]
    fn test_predicates_are_hierarchical() {
        let a = loc("m0", Some("r0"), Some("s0"));
        let b = loc("m0", Some("r1"), Some("s0"));
        let c = loc("m0", Some("r0"), Some("s1"));

        // Same machine label but different rack is not the same machine
        assert!(a.same_site(&b));
        assert!(!a.same_rack(&b));
        assert!(!a.same_machine(&b));

        // Same rack label on another site is a different rack
        assert!(!a.same_site(&c));
        assert!(!a.same_rack(&c));
    }

    #[test]
    fn test_missing_topology_is_an_error() {
        let info = TopologyInfo::new().with_node(NodeId(1), loc("m0", None, None));
        assert_eq!(
            info.same_site(&NodeId(1), &NodeId(2)),
            Err(Error::MissingTopology(NodeId(2)))
        );
        // Reflexive even without a lookup
        assert_eq!(info.same_machine(&NodeId(7), &NodeId(7)), Ok(true));
        assert!(info.locations_for(&[NodeId(1), NodeId(2)]).is_err());
    }

    #[test]
    fn test_pick_diverse_prefers_new_sites() {
        let members = [NodeId(0), NodeId(1), NodeId(2), NodeId(3)];
        let info = TopologyInfo::new()
            .with_node(members[0], loc("m0", None, Some("s0")))
            .with_node(members[1], loc("m1", None, Some("s0")))
            .with_node(members[2], loc("m2", None, Some("s1")))
            .with_node(members[3], loc("m3", None, Some("s1")));
        let locations = info.locations_for(&members).unwrap();

        assert_eq!(locations.pick_diverse(&[0, 1, 2, 3], 2), vec![0, 2]);
        assert_eq!(locations.pick_diverse(&[0, 1, 2, 3], 3), vec![0, 2, 1]);
        assert_eq!(locations.pick_diverse(&[0, 1, 2, 3], 9), vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_diversity_ordering() {
        let members = [NodeId(0), NodeId(1), NodeId(2)];
        let info = TopologyInfo::new()
            .with_node(members[0], loc("m0", Some("r0"), Some("s0")))
            .with_node(members[1], loc("m1", Some("r0"), Some("s0")))
            .with_node(members[2], loc("m0", Some("r0"), Some("s1")));
        let locations = info.locations_for(&members).unwrap();

        let same_site = locations.diversity([0, 1]);
        let two_sites = locations.diversity([0, 2]);
        assert_eq!(same_site, Diversity { sites: 1, racks: 1, machines: 2 });
        assert!(two_sites > same_site);
    }
}
