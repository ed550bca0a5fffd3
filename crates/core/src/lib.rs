//! Shared types for the xapiand workspace: endpoint identity, cluster node
//! records, the generic action-returning LRU, the `IndexBackend` contract,
//! and jump-consistent-hash placement.

pub mod backend;
pub mod endpoint;
pub mod error;
pub mod hash;
pub mod lru;
pub mod node;

pub use backend::{BackendError, BackendResult, IndexBackend, IndexBackendFactory, MemoryBackend, MemoryBackendFactory, OpenFlags};
pub use endpoint::{Endpoint, Endpoints};
pub use error::{Result, XapiandError};
pub use hash::{hash_bytes, jump_consistent_hash, replica_placement};
pub use lru::{DropAction, GetAction, Lru};
pub use node::{now_ms, Node};
