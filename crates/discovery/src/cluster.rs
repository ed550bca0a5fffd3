//! Cluster membership tracking, touching, heartbeat sweep, and
//! `DB_UPDATED` → pull-replication triggering (spec.md §3 "Cluster node",
//! §4.G "Touching" / "DB_UPDATED handling").

use rand::Rng;
use rustc_hash::FxHashMap;
use xapiand_core::hash::jump_consistent_hash;
use xapiand_core::node::{now_ms, Node};

pub const HEARTBEAT_MAX_MS: u64 = 30_000;
/// Scatter-window for pull-replication scheduling after a `DB_UPDATED`
/// (spec.md §4.G step 3: "0-3s").
pub const PULL_SCATTER_MAX_MS: u64 = 3_000;

/// A request to pull-replicate a path from a remote node, with the
/// random scatter delay already chosen (spec.md §4.G step 3).
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub source: Node,
    pub path: String,
    pub delay_ms: u64,
}

/// Tracks the known node set for one cluster. Node names are unique
/// cluster-wide (spec.md §3 invariant); `touched_at` drives the
/// heartbeat sweep.
pub struct ClusterState {
    local_name: String,
    nodes: FxHashMap<String, Node>,
    leader_name: Option<String>,
    num_replicas: usize,
}

impl ClusterState {
    pub fn new(local: Node, num_replicas: usize) -> Self {
        let local_name = local.name.clone();
        let mut nodes = FxHashMap::default();
        nodes.insert(local_name.clone(), local);
        ClusterState {
            local_name,
            nodes,
            leader_name: None,
            num_replicas: num_replicas.max(1),
        }
    }

    pub fn local(&self) -> &Node {
        self.nodes.get(&self.local_name).expect("local node always present")
    }

    pub fn leader(&self) -> Option<&Node> {
        self.leader_name.as_ref().and_then(|name| self.nodes.get(name))
    }

    pub fn set_leader(&mut self, name: impl Into<String>) {
        self.leader_name = Some(name.into());
    }

    pub fn is_leader(&self) -> bool {
        self.leader_name.as_deref() == Some(self.local_name.as_str())
    }

    /// Record (or refresh) a node, as every received gossip message does
    /// for its sender (spec.md §4.G "Touching").
    pub fn touch(&mut self, node: Node) {
        match self.nodes.get_mut(&node.name) {
            Some(existing) => {
                existing.touched_at_ms = node.touched_at_ms;
                existing.host = node.host;
                existing.http_port = node.http_port;
                existing.binary_port = node.binary_port;
                existing.region = node.region;
                for (path, level) in node.mastery_level_per_path {
                    existing.mastery_level_per_path.insert(path, level);
                }
            }
            None => {
                self.nodes.insert(node.name.clone(), node);
            }
        }
    }

    pub fn forget(&mut self, name: &str) {
        if name != self.local_name {
            self.nodes.remove(name);
        }
    }

    pub fn active_nodes(&self) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.is_active(HEARTBEAT_MAX_MS)).collect()
    }

    /// Background sweep: drop any node whose `touched_at` is stale.
    /// Returns the names dropped, and whether the leader was among them
    /// (the caller should then trigger leader renewal — out of scope
    /// consensus, per spec.md §1).
    pub fn sweep_stale(&mut self, now_ms: u64) -> (Vec<String>, bool) {
        let stale: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.name != self.local_name && now_ms.saturating_sub(n.touched_at_ms) > HEARTBEAT_MAX_MS)
            .map(|n| n.name.clone())
            .collect();
        let mut leader_dropped = false;
        for name in &stale {
            if self.leader_name.as_deref() == Some(name.as_str()) {
                leader_dropped = true;
                self.leader_name = None;
            }
            self.nodes.remove(name);
        }
        (stale, leader_dropped)
    }

    /// Active node names in a stable order, used as the bucket universe
    /// for jump-consistent-hash placement (spec.md §6).
    fn active_names_sorted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.active_nodes().into_iter().map(|n| n.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Replica node names for `path`, by the sole placement function
    /// (spec.md §6 "Consistent hashing").
    pub fn replicas_for(&self, path: &str) -> Vec<&str> {
        let names = self.active_names_sorted();
        if names.is_empty() {
            return Vec::new();
        }
        let key = xapiand_core::hash::hash_bytes(path.as_bytes());
        let n = names.len() as i32;
        let first = jump_consistent_hash(key, n) as usize;
        (0..self.num_replicas.min(names.len()))
            .map(|i| names[(first + i) % names.len()])
            .collect()
    }

    pub fn is_replica_for(&self, path: &str) -> bool {
        self.replicas_for(path).contains(&self.local_name.as_str())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// `DB_UPDATED` handling (spec.md §4.G): touch the sender, and if
    /// this node is a replica for `path`, schedule a pull with a small
    /// random scatter delay to avoid thundering herds.
    pub fn handle_db_updated(&mut self, remote: Node, path: String) -> Option<PullRequest> {
        let remote_for_pull = remote.clone();
        self.touch(remote);
        if remote_for_pull.name == self.local_name {
            return None;
        }
        if !self.is_replica_for(&path) {
            return None;
        }
        let delay_ms = rand::thread_rng().gen_range(0..=PULL_SCATTER_MAX_MS);
        Some(PullRequest {
            source: remote_for_pull,
            path,
            delay_ms,
        })
    }

    pub fn now() -> u64 {
        now_ms()
    }
}
