//! Per-node discovery state machine (spec.md §4.G "Node states").
//!
//! `RESET → WAITING (fast, 0.5s) → WAITING_MORE (slow, 3s) → JOINING →
//! SETUP → READY → BAD`. The RESET state is collapsed into the
//! transition that enters WAITING: spec.md describes it as "pick or
//! regenerate local name; broadcast HELLO; move to WAITING", which is a
//! single atomic step rather than a state a caller ever observes at
//! rest.

use rand::Rng;
use xapiand_core::node::Node;

use crate::message::Message;

pub const FAST_TIMEOUT_MS: u64 = 500;
pub const SLOW_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    WaitingMore,
    Joining,
    Setup,
    Ready,
    Bad,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FsmAction {
    /// Broadcast this gossip message to the cluster multicast group.
    Broadcast(Message),
    /// The FSM has just entered READY; the caller should start serving
    /// traffic and (if not leader) pull the cluster DB.
    EnteredReady,
    /// A fatal, unrecoverable name conflict (spec.md §4.G).
    Fatal(String),
}

/// Drives one local node through the discovery FSM. Orchestration
/// (multicast send/receive, the periodic timer tick, cluster-DB sync)
/// lives in the caller; this type only holds state and decides
/// transitions.
pub struct NodeFsm {
    state: NodeState,
    local: Node,
    name_autogenerated: bool,
    state_entered_ms: u64,
}

impl NodeFsm {
    /// `configured_name` is the administrator-supplied name, or `None`
    /// to auto-generate one (spec.md §4.G "if name was auto-generated").
    pub fn start(local_host: &str, http_port: u16, binary_port: u16, configured_name: Option<String>, now_ms: u64) -> (Self, FsmAction) {
        let (name, autogenerated) = match configured_name {
            Some(name) => (name, false),
            None => (generate_name(), true),
        };
        let local = Node::new(name, local_host, http_port, binary_port);
        let hello = FsmAction::Broadcast(Message::Hello(local.clone()));
        (
            NodeFsm {
                state: NodeState::Waiting,
                local,
                name_autogenerated: autogenerated,
                state_entered_ms: now_ms,
            },
            hello,
        )
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn local(&self) -> &Node {
        &self.local
    }

    pub fn is_ready(&self) -> bool {
        self.state == NodeState::Ready
    }

    /// Periodic timer tick: advances WAITING→WAITING_MORE and
    /// WAITING_MORE→JOINING on timeout.
    pub fn on_timer(&mut self, now_ms: u64) -> Vec<FsmAction> {
        let elapsed = now_ms.saturating_sub(self.state_entered_ms);
        match self.state {
            NodeState::Waiting if elapsed >= FAST_TIMEOUT_MS => {
                self.state = NodeState::WaitingMore;
                self.state_entered_ms = now_ms;
                Vec::new()
            }
            NodeState::WaitingMore if elapsed >= SLOW_TIMEOUT_MS => {
                self.state = NodeState::Joining;
                self.state_entered_ms = now_ms;
                vec![FsmAction::Broadcast(Message::Enter(self.local.clone()))]
            }
            _ => Vec::new(),
        }
    }

    /// Handle a received gossip message (already filtered for protocol
    /// version and cluster-name match by the caller).
    pub fn on_message(&mut self, msg: &Message, now_ms: u64) -> Vec<FsmAction> {
        match msg {
            Message::Wave(n) | Message::Enter(n) if n.name == self.local.name && self.state == NodeState::Waiting => {
                self.state = NodeState::WaitingMore;
                self.state_entered_ms = now_ms;
                Vec::new()
            }
            Message::Sneer(n) if n.name == self.local.name && self.state != NodeState::Ready => {
                if self.name_autogenerated {
                    self.local.name = generate_name();
                    self.state = NodeState::Waiting;
                    self.state_entered_ms = now_ms;
                    vec![FsmAction::Broadcast(Message::Hello(self.local.clone()))]
                } else {
                    self.state = NodeState::Bad;
                    vec![FsmAction::Fatal(format!("name '{}' is already taken", self.local.name))]
                }
            }
            Message::Hello(n) if n.name == self.local.name && self.state == NodeState::Ready => {
                vec![FsmAction::Broadcast(Message::Sneer(self.local.clone()))]
            }
            _ => Vec::new(),
        }
    }

    /// JOINING → SETUP: the caller is about to synchronize the cluster
    /// database (spec.md §4.G).
    pub fn enter_setup(&mut self, now_ms: u64) {
        if self.state == NodeState::Joining {
            self.state = NodeState::Setup;
            self.state_entered_ms = now_ms;
        }
    }

    /// SETUP → READY, once the cluster database has been synchronized.
    pub fn mark_ready(&mut self, now_ms: u64) -> Vec<FsmAction> {
        if self.state == NodeState::Setup {
            self.state = NodeState::Ready;
            self.state_entered_ms = now_ms;
            vec![FsmAction::EnteredReady]
        } else {
            Vec::new()
        }
    }
}

fn generate_name() -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("node-{suffix:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_broadcasts_hello_and_enters_waiting() {
        let (fsm, action) = NodeFsm::start("127.0.0.1", 8880, 8890, Some("x".into()), 0);
        assert_eq!(fsm.state(), NodeState::Waiting);
        assert!(matches!(action, FsmAction::Broadcast(Message::Hello(_))));
    }

    #[test]
    fn wave_for_our_name_advances_to_waiting_more() {
        let (mut fsm, _) = NodeFsm::start("127.0.0.1", 8880, 8890, Some("x".into()), 0);
        let wave = Message::Wave(Node::new("x", "10.0.0.2", 1, 2));
        fsm.on_message(&wave, 10);
        assert_eq!(fsm.state(), NodeState::WaitingMore);
    }

    #[test]
    fn fast_timeout_advances_without_messages() {
        let (mut fsm, _) = NodeFsm::start("127.0.0.1", 8880, 8890, Some("x".into()), 0);
        let actions = fsm.on_timer(FAST_TIMEOUT_MS);
        assert!(actions.is_empty());
        assert_eq!(fsm.state(), NodeState::WaitingMore);
    }

    #[test]
    fn slow_timeout_broadcasts_enter_and_joins() {
        let (mut fsm, _) = NodeFsm::start("127.0.0.1", 8880, 8890, Some("x".into()), 0);
        fsm.on_timer(FAST_TIMEOUT_MS);
        let actions = fsm.on_timer(FAST_TIMEOUT_MS + SLOW_TIMEOUT_MS);
        assert_eq!(fsm.state(), NodeState::Joining);
        assert!(matches!(actions.as_slice(), [FsmAction::Broadcast(Message::Enter(_))]));
    }

    #[test]
    fn sneer_with_configured_name_is_fatal() {
        let (mut fsm, _) = NodeFsm::start("127.0.0.1", 8880, 8890, Some("x".into()), 0);
        let sneer = Message::Sneer(Node::new("x", "10.0.0.2", 1, 2));
        let actions = fsm.on_message(&sneer, 10);
        assert_eq!(fsm.state(), NodeState::Bad);
        assert!(matches!(actions.as_slice(), [FsmAction::Fatal(_)]));
    }

    #[test]
    fn sneer_with_autogenerated_name_regenerates_and_retries() {
        let (mut fsm, _) = NodeFsm::start("127.0.0.1", 8880, 8890, None, 0);
        let original_name = fsm.local().name.clone();
        let sneer = Message::Sneer(Node::new(&original_name, "10.0.0.2", 1, 2));
        let actions = fsm.on_message(&sneer, 10);
        assert_eq!(fsm.state(), NodeState::Waiting);
        assert_ne!(fsm.local().name, original_name);
        assert!(matches!(actions.as_slice(), [FsmAction::Broadcast(Message::Hello(_))]));
    }

    #[test]
    fn full_happy_path_reaches_ready() {
        let (mut fsm, _) = NodeFsm::start("127.0.0.1", 8880, 8890, Some("x".into()), 0);
        fsm.on_timer(FAST_TIMEOUT_MS);
        fsm.on_timer(FAST_TIMEOUT_MS + SLOW_TIMEOUT_MS);
        assert_eq!(fsm.state(), NodeState::Joining);
        fsm.enter_setup(FAST_TIMEOUT_MS + SLOW_TIMEOUT_MS);
        assert_eq!(fsm.state(), NodeState::Setup);
        let actions = fsm.mark_ready(FAST_TIMEOUT_MS + SLOW_TIMEOUT_MS + 1);
        assert_eq!(fsm.state(), NodeState::Ready);
        assert!(matches!(actions.as_slice(), [FsmAction::EnteredReady]));
    }
}
