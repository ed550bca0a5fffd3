//! The worker tree, modeled as an arena with stable indices rather than
//! `Rc`/`Weak` back-references (spec.md §9 "Cyclic graphs / back
//! references": "Model as arena-of-workers + stable indices... Avoid
//! reference cycles by making the parent's list the sole owner").
//!
//! Every worker except the root has exactly one parent, and a parent's
//! `children` vector is the sole owner of its child slots: nothing else
//! in the tree holds a strong reference to a child, so there is no cycle
//! to break and no `Drop` ordering to reason about.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{WorkerError, WorkerResult};

/// A stable index into the arena. Indices are reused once a worker is
/// destroyed, but never while any live worker still references them as a
/// parent or child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Manager,
    HttpAcceptor,
    BinaryAcceptor,
    HttpConnection,
    BinaryConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// `shutdown(asap)` was called; the worker finishes in-flight work and
    /// waits for `detach_children` to reap it.
    Detaching,
    Destroyed,
}

/// A signal delivered to a worker's lifecycle channel (spec.md §4.H: each
/// worker exposes `shutdown(asap, now)`, `destroy()`, `detach_children()`
/// as async operations rather than direct calls, so a worker's own event
/// loop decides when it is safe to act on them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Finish in-flight work, then stop accepting new work.
    ShutdownAsap,
    /// Stop immediately, abandoning in-flight work.
    ShutdownNow,
    /// Tear this worker down; only valid once it has no live children.
    Destroy,
    /// Reap every child currently in `Detaching` state.
    DetachChildren,
}

struct WorkerNode {
    kind: WorkerKind,
    parent: Option<WorkerId>,
    children: Vec<WorkerId>,
    state: WorkerState,
    signals: mpsc::UnboundedSender<LifecycleSignal>,
}

pub struct WorkerTree {
    slots: Mutex<Vec<Option<WorkerNode>>>,
    free: Mutex<Vec<usize>>,
}

impl Default for WorkerTree {
    fn default() -> Self {
        WorkerTree {
            slots: Mutex::new(Vec::new()),
            free: Mutex::new(Vec::new()),
        }
    }
}

impl WorkerTree {
    /// Create an empty tree together with its root worker (conventionally
    /// the manager itself).
    pub fn new(root_kind: WorkerKind) -> (Self, WorkerId, mpsc::UnboundedReceiver<LifecycleSignal>) {
        let tree = WorkerTree::default();
        let (id, rx) = tree.insert(root_kind, None);
        (tree, id, rx)
    }

    fn insert(&self, kind: WorkerKind, parent: Option<WorkerId>) -> (WorkerId, mpsc::UnboundedReceiver<LifecycleSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let node = WorkerNode {
            kind,
            parent,
            children: Vec::new(),
            state: WorkerState::Running,
            signals: tx,
        };
        let mut slots = self.slots.lock();
        let index = match self.free.lock().pop() {
            Some(index) => {
                slots[index] = Some(node);
                index
            }
            None => {
                slots.push(Some(node));
                slots.len() - 1
            }
        };
        (WorkerId(index), rx)
    }

    /// Spawn `kind` as a child of `parent`. `parent`'s children list
    /// becomes the sole strong owner of the new slot.
    pub fn spawn_child(
        &self,
        parent: WorkerId,
        kind: WorkerKind,
    ) -> WorkerResult<(WorkerId, mpsc::UnboundedReceiver<LifecycleSignal>)> {
        {
            let slots = self.slots.lock();
            let parent_node = slots
                .get(parent.0)
                .and_then(|s| s.as_ref())
                .ok_or(WorkerError::NotFound(parent))?;
            if parent_node.state == WorkerState::Destroyed {
                return Err(WorkerError::AlreadyDestroyed(parent));
            }
        }
        let (child, rx) = self.insert(kind, Some(parent));
        let mut slots = self.slots.lock();
        slots[parent.0].as_mut().unwrap().children.push(child);
        Ok((child, rx))
    }

    pub fn kind_of(&self, id: WorkerId) -> WorkerResult<WorkerKind> {
        self.with_node(id, |node| node.kind)
    }

    pub fn state_of(&self, id: WorkerId) -> WorkerResult<WorkerState> {
        self.with_node(id, |node| node.state)
    }

    pub fn children_of(&self, id: WorkerId) -> WorkerResult<Vec<WorkerId>> {
        self.with_node(id, |node| node.children.clone())
    }

    pub fn parent_of(&self, id: WorkerId) -> WorkerResult<Option<WorkerId>> {
        self.with_node(id, |node| node.parent)
    }

    fn with_node<T>(&self, id: WorkerId, f: impl FnOnce(&WorkerNode) -> T) -> WorkerResult<T> {
        let slots = self.slots.lock();
        slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .map(f)
            .ok_or(WorkerError::NotFound(id))
    }

    /// `shutdown(id, asap)`: deliver the matching signal to `id` and to
    /// every descendant, depth-first, marking each `Detaching`. A worker
    /// that observes `ShutdownAsap` on its own channel is expected to
    /// finish in-flight work and then await `detach_children` from its
    /// parent; `ShutdownNow` asks it to stop immediately instead.
    pub fn shutdown(&self, id: WorkerId, asap: bool) -> WorkerResult<()> {
        let signal = if asap { LifecycleSignal::ShutdownAsap } else { LifecycleSignal::ShutdownNow };
        let children = self.children_of(id)?;
        for child in &children {
            self.shutdown(*child, asap)?;
        }
        let mut slots = self.slots.lock();
        let node = slots.get_mut(id.0).and_then(|s| s.as_mut()).ok_or(WorkerError::NotFound(id))?;
        if node.state == WorkerState::Destroyed {
            return Err(WorkerError::AlreadyDestroyed(id));
        }
        node.state = WorkerState::Detaching;
        let _ = node.signals.send(signal);
        tracing::debug!(?id, asap, "worker shutdown signaled");
        Ok(())
    }

    /// Reap every child of `id` that is `Detaching` and has itself
    /// already shed all of its own children, destroying it and freeing
    /// its slot. Returns the destroyed ids.
    pub fn detach_children(&self, id: WorkerId) -> WorkerResult<Vec<WorkerId>> {
        let children = self.children_of(id)?;
        let mut reaped = Vec::new();
        for child in children {
            let ready = {
                let slots = self.slots.lock();
                let node = slots.get(child.0).and_then(|s| s.as_ref());
                matches!(node, Some(n) if n.state == WorkerState::Detaching && n.children.is_empty())
            };
            if ready {
                self.destroy(child)?;
                reaped.push(child);
            }
        }
        if !reaped.is_empty() {
            let mut slots = self.slots.lock();
            if let Some(parent_node) = slots.get_mut(id.0).and_then(|s| s.as_mut()) {
                parent_node.children.retain(|c| !reaped.contains(c));
            }
        }
        Ok(reaped)
    }

    /// Tear `id` itself down. Only valid once it has no live children —
    /// callers drain those via `detach_children` first; a worker with
    /// children still attached refuses with `AlreadyDestroyed`-shaped
    /// misuse prevented by the `children.is_empty()` checks above.
    fn destroy(&self, id: WorkerId) -> WorkerResult<()> {
        let mut slots = self.slots.lock();
        let node = slots.get_mut(id.0).and_then(|s| s.as_mut()).ok_or(WorkerError::NotFound(id))?;
        node.state = WorkerState::Destroyed;
        let _ = node.signals.send(LifecycleSignal::Destroy);
        slots[id.0] = None;
        drop(slots);
        self.free.lock().push(id.0);
        tracing::debug!(?id, "worker destroyed, slot freed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_slot_is_reused_after_destroy() {
        let (tree, root, _rx) = WorkerTree::new(WorkerKind::Manager);
        let (child, _crx) = tree.spawn_child(root, WorkerKind::HttpAcceptor).unwrap();
        tree.shutdown(child, true).unwrap();
        let reaped = tree.detach_children(root).unwrap();
        assert_eq!(reaped, vec![child]);
        assert!(tree.children_of(root).unwrap().is_empty());

        let (reused, _rx2) = tree.spawn_child(root, WorkerKind::BinaryAcceptor).unwrap();
        assert_eq!(reused, child, "freed slot should be reused by index");
        assert_eq!(tree.kind_of(reused).unwrap(), WorkerKind::BinaryAcceptor);
    }

    #[test]
    fn shutdown_propagates_to_every_descendant() {
        let (tree, root, _rx) = WorkerTree::new(WorkerKind::Manager);
        let (acceptor, _arx) = tree.spawn_child(root, WorkerKind::HttpAcceptor).unwrap();
        let (conn, _crx) = tree.spawn_child(acceptor, WorkerKind::HttpConnection).unwrap();

        tree.shutdown(root, false).unwrap();

        assert_eq!(tree.state_of(root).unwrap(), WorkerState::Detaching);
        assert_eq!(tree.state_of(acceptor).unwrap(), WorkerState::Detaching);
        assert_eq!(tree.state_of(conn).unwrap(), WorkerState::Detaching);
    }

    #[test]
    fn detach_children_waits_for_grandchildren_to_clear_first() {
        let (tree, root, _rx) = WorkerTree::new(WorkerKind::Manager);
        let (acceptor, _arx) = tree.spawn_child(root, WorkerKind::HttpAcceptor).unwrap();
        let (conn, _crx) = tree.spawn_child(acceptor, WorkerKind::HttpConnection).unwrap();

        tree.shutdown(acceptor, true).unwrap();
        tree.shutdown(conn, true).unwrap();

        // Acceptor still has its connection attached: not yet reapable.
        assert!(tree.detach_children(root).unwrap().is_empty());

        tree.detach_children(acceptor).unwrap();
        let reaped = tree.detach_children(root).unwrap();
        assert_eq!(reaped, vec![acceptor]);
    }

    #[test]
    fn spawn_on_unknown_parent_is_rejected() {
        let (tree, root, _rx) = WorkerTree::new(WorkerKind::Manager);
        let (ghost, _rx2) = tree.spawn_child(root, WorkerKind::HttpAcceptor).unwrap();
        tree.shutdown(ghost, true).unwrap();
        tree.detach_children(root).unwrap();

        let err = tree.spawn_child(ghost, WorkerKind::HttpConnection).unwrap_err();
        assert!(matches!(err, WorkerError::NotFound(_)));
    }
}
