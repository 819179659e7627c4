//! Error types for the core library.

use crate::node::NodeId;
use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Rejected input: bad owner count, bad capacity factors, malformed owner lists.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The node is not a member of the hash being queried.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),
    /// A topology-aware placement needs a location for every member.
    #[error("No topology information for node {0}")]
    MissingTopology(NodeId),
    /// The operation is not defined for this kind of hash.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
    /// Every slot of the wheel is taken.
    #[error("Hash wheel is full ({0} positions)")]
    RingFull(u32),
    /// Encoding or decoding the wire form failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
