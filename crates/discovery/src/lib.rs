//! UDP gossip discovery, the per-node state machine, cluster membership,
//! and the pull-replication byte protocol (spec.md §4.G).

pub mod cluster;
pub mod error;
pub mod fsm;
pub mod gossip;
pub mod message;
pub mod replication;

pub use cluster::{ClusterState, PullRequest, HEARTBEAT_MAX_MS};
pub use error::{DiscoveryError, DiscoveryResult};
pub use fsm::{FsmAction, NodeFsm, NodeState};
pub use gossip::GossipService;
pub use message::Message;
pub use replication::{pull_changesets, serve_pull_request, GetChangesetsRequest, PullOutcome};
