//! Placement algorithms for consistent hashing.
//!
//! This crate decides which members own which segments:
//! - Fresh, balanced assignments for a member list
//! - Minimal-movement updates when members leave or join
//! - Topology-aware placement across sites, racks and machines
//! - Deterministic, position-derived assignment for partition healing

pub mod builder;
pub mod error;
pub mod stats;
pub mod strategy;

pub use builder::SegmentBuilder;
pub use error::{ReplicationError, Result};
pub use stats::OwnershipStatistics;
pub use strategy::{
    ConsistentHashFactory, DefaultConsistentHashFactory, ReplicatedConsistentHashFactory,
    SyncConsistentHashFactory, TopologyAwareConsistentHashFactory,
};
