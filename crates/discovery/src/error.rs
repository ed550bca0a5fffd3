//! Discovery/replication error taxonomy (spec.md §4.G, §7).
//!
//! Discovery errors never surface to an HTTP caller: they mutate
//! internal node-FSM state only (spec.md §7 "Propagation policy").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed gossip datagram: {0}")]
    Malformed(String),

    #[error("unsupported protocol major version {0}")]
    UnsupportedVersion(u8),

    #[error("cluster name mismatch: expected {expected}, got {got}")]
    ClusterNameMismatch { expected: String, got: String },

    #[error("local node name {0} is taken and fatally conflicted")]
    NameConflictFatal(String),

    #[error("replication refused: remote mastery {remote} is not higher than local {local}")]
    MasteryNotHigher { remote: i64, local: i64 },

    #[error("remote replica stream failed: {0}")]
    ReplicationFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] xapiand_storage::StorageError),
}

pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

impl From<DiscoveryError> for xapiand_core::XapiandError {
    fn from(e: DiscoveryError) -> Self {
        xapiand_core::XapiandError::Network(e.to_string())
    }
}
