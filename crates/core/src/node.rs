//! Cluster node identity.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A cluster node record (spec.md §3).
///
/// Node names are unique cluster-wide; `touched_at` is refreshed by every
/// gossip message received from this node (§4.G "Touching").
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub name: String,
    pub host: String,
    pub http_port: u16,
    pub binary_port: u16,
    pub region: String,
    pub touched_at_ms: u64,
    pub mastery_level_per_path: HashMap<String, i64>,
}

impl Node {
    pub fn new(name: impl Into<String>, host: impl Into<String>, http_port: u16, binary_port: u16) -> Self {
        Node {
            name: name.into(),
            host: host.into(),
            http_port,
            binary_port,
            region: String::new(),
            touched_at_ms: now_ms(),
            mastery_level_per_path: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.touched_at_ms = now_ms();
    }

    /// Whether this node's last touch is within `heartbeat_max_ms` of now.
    pub fn is_active(&self, heartbeat_max_ms: u64) -> bool {
        now_ms().saturating_sub(self.touched_at_ms) <= heartbeat_max_ms
    }

    pub fn mastery_level(&self, path: &str) -> i64 {
        *self.mastery_level_per_path.get(path).unwrap_or(&0)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_within_heartbeat() {
        let node = Node::new("n1", "127.0.0.1", 8880, 8890);
        assert!(node.is_active(5_000));
    }

    #[test]
    fn inactive_when_stale() {
        let mut node = Node::new("n1", "127.0.0.1", 8880, 8890);
        node.touched_at_ms = 0;
        assert!(!node.is_active(1_000));
    }
}
