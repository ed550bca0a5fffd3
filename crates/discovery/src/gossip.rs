//! Wires the node FSM, cluster membership table, and a UDP multicast
//! socket together (spec.md §4.G).
//!
//! Following the design notes in spec.md §9 ("Coroutines / async
//! callbacks"), the FSM and `ClusterState` never touch the socket
//! themselves — they are pure state machines that return `FsmAction`s /
//! `PullRequest`s describing what the runtime should do. `GossipService`
//! is the runtime: it owns the socket, drives the timer, and turns
//! returned actions into sends or into `PullRequest`s handed to its
//! caller over a channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;
use xapiand_core::endpoint::Endpoint;
use xapiand_core::node::now_ms;

use crate::cluster::{ClusterState, PullRequest};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::fsm::{FsmAction, NodeFsm};
use crate::message::Message;

const MAX_DATAGRAM: usize = 65_507;
/// How often the FSM timer tick and heartbeat sweep run.
const TICK_INTERVAL_MS: u64 = 100;

pub struct GossipService {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    cluster_name: String,
    fsm: Mutex<NodeFsm>,
    cluster: Mutex<ClusterState>,
    pulls: mpsc::UnboundedSender<PullRequest>,
}

impl GossipService {
    pub async fn bind(
        bind_addr: SocketAddr,
        broadcast_addr: SocketAddr,
        cluster_name: impl Into<String>,
        local_host: &str,
        http_port: u16,
        binary_port: u16,
        configured_name: Option<String>,
        num_replicas: usize,
    ) -> DiscoveryResult<(Arc<Self>, mpsc::UnboundedReceiver<PullRequest>)> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        let (fsm, hello) = NodeFsm::start(local_host, http_port, binary_port, configured_name, now_ms());
        let cluster = ClusterState::new(fsm.local().clone(), num_replicas);
        let (pulls_tx, pulls_rx) = mpsc::unbounded_channel();

        let service = Arc::new(GossipService {
            socket,
            broadcast_addr,
            cluster_name: cluster_name.into(),
            fsm: Mutex::new(fsm),
            cluster: Mutex::new(cluster),
            pulls: pulls_tx,
        });
        service.dispatch(vec![hello]).await?;
        Ok((service, pulls_rx))
    }

    pub fn local_name(&self) -> String {
        self.fsm.lock().local().name.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.fsm.lock().is_ready()
    }

    /// Announce that this node just committed `path`, broadcasting
    /// `DB_UPDATED` (spec.md data-flow: "on commit, G broadcasts
    /// DB_UPDATED").
    pub async fn announce_commit(&self, path: impl Into<String>) -> DiscoveryResult<()> {
        let node = self.fsm.lock().local().clone();
        self.send(&Message::DbUpdated { node, path: path.into() }).await
    }

    /// Drive the gossip service forever: receive datagrams, run the
    /// timer tick, and react to both. Returns only on a fatal FSM
    /// transition or an I/O error.
    pub async fn run(self: &Arc<Self>) -> DiscoveryResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut ticker = interval(Duration::from_millis(TICK_INTERVAL_MS));
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, _from) = received?;
                    self.handle_datagram(&buf[..len]).await?;
                }
                _ = ticker.tick() => {
                    self.handle_tick().await?;
                }
            }
        }
    }

    async fn handle_datagram(&self, bytes: &[u8]) -> DiscoveryResult<()> {
        let (cluster_name, message) = match Message::decode(bytes) {
            Ok(parsed) => parsed,
            Err(DiscoveryError::UnsupportedVersion(_)) => return Ok(()),
            Err(DiscoveryError::Malformed(reason)) => {
                tracing::debug!(reason, "dropping malformed gossip datagram");
                return Ok(());
            }
            Err(other) => return Err(other),
        };
        if cluster_name != self.cluster_name {
            return Ok(());
        }

        self.cluster.lock().touch(message.node().clone());

        if let Message::DbUpdated { node, path } = &message {
            if let Some(pull) = self.cluster.lock().handle_db_updated(node.clone(), path.clone()) {
                let _ = self.pulls.send(pull);
            }
        }

        let actions = self.fsm.lock().on_message(&message, now_ms());
        self.dispatch(actions).await
    }

    async fn handle_tick(&self) -> DiscoveryResult<()> {
        let actions = self.fsm.lock().on_timer(now_ms());
        self.dispatch(actions).await?;

        let (_dropped, leader_dropped) = self.cluster.lock().sweep_stale(now_ms());
        if leader_dropped {
            tracing::warn!("leader node dropped from heartbeat sweep; leader renewal is out of scope here");
        }
        Ok(())
    }

    async fn dispatch(&self, actions: Vec<FsmAction>) -> DiscoveryResult<()> {
        for action in actions {
            match action {
                FsmAction::Broadcast(message) => self.send(&message).await?,
                FsmAction::EnteredReady => {
                    tracing::info!(name = %self.local_name(), "node ready");
                }
                FsmAction::Fatal(reason) => {
                    tracing::error!(reason, "fatal discovery FSM transition");
                    return Err(DiscoveryError::NameConflictFatal(reason));
                }
            }
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> DiscoveryResult<()> {
        let bytes = message.encode(&self.cluster_name)?;
        self.socket.send_to(&bytes, self.broadcast_addr).await?;
        Ok(())
    }

    /// Replica endpoints for `path` by jump-consistent-hash placement,
    /// with host/binary port filled in from the cluster membership table
    /// (spec.md §6 "Resolve API" backs onto the same placement rule as
    /// `ClusterState::replicas_for`).
    pub fn replica_endpoints(&self, path: &str) -> Vec<Endpoint> {
        let cluster = self.cluster.lock();
        cluster
            .replicas_for(path)
            .into_iter()
            .filter_map(|name| cluster.node(name))
            .map(|node| Endpoint::new(node.host.clone(), node.binary_port, path))
            .collect()
    }

    /// JOINING → SETUP → READY, once the caller has synchronized the
    /// cluster database (spec.md §4.G). Exposed separately because that
    /// synchronization needs the replication pull path, which this crate
    /// only specifies the contract for.
    pub fn begin_setup(&self) {
        self.fsm.lock().enter_setup(now_ms());
    }

    pub async fn finish_setup(&self) -> DiscoveryResult<()> {
        let actions = self.fsm.lock().mark_ready(now_ms());
        self.dispatch(actions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_nodes_converge_to_distinct_names() {
        let cluster_name = "test-cluster";
        let (a, _a_pulls) = GossipService::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:19999".parse().unwrap(),
            cluster_name,
            "127.0.0.1",
            8880,
            8890,
            None,
            1,
        )
        .await
        .unwrap();
        let (b, _b_pulls) = GossipService::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:19999".parse().unwrap(),
            cluster_name,
            "127.0.0.1",
            8881,
            8891,
            None,
            1,
        )
        .await
        .unwrap();

        assert_ne!(a.local_name(), b.local_name());
    }
}
