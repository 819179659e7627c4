//! Error types for the placement algorithms.

use thiserror::Error;

/// Result type alias for the replication crate.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors raised while building or rebalancing a consistent hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// Error from the core data model (validation, topology lookups).
    #[error(transparent)]
    Core(#[from] corelib::Error),
    /// Rejected factory input; nothing was built.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A builder invariant was violated. Always a bug in the algorithm.
    #[error("Inconsistent builder state: {0}")]
    InconsistentState(String),
}
