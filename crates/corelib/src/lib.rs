//! Core library for segment-based consistent hashing.
//!
//! This crate provides the immutable data model shared by every member:
//! - Node identity and the cluster-wide hash function
//! - Topology (site/rack/machine) metadata
//! - Segment-based consistent hashes and their union view
//! - The legacy hash wheel with virtual nodes
//!
//! The algorithms that build and rebalance hashes live in `replication`.

pub mod ch;
pub mod error;
pub mod hash;
pub mod node;
pub mod ring;
pub mod topology;
pub mod vnode;

pub use ch::{
    CapacityFactors, ConsistentHash, DefaultConsistentHash, ReplicatedConsistentHash,
    UnionConsistentHash,
};
pub use error::{Error, Result};
pub use hash::HashFunction;
pub use node::NodeId;
pub use ring::{RingBuilder, WheelConsistentHash};
pub use topology::{Locations, NodeTopologyInfo, TopologyInfo, TopologyLevel};
pub use vnode::NodeRef;
