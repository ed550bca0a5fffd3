//! The worker tree and the `Acceptor`/`Connection` I/O capability sets
//! (spec.md §4.H "Worker / Async Glue").
//!
//! A manager's workers form a tree: the manager itself is the root, each
//! listening socket is a child worker, and each accepted connection is a
//! child of its listener. Shutdown is cooperative and signal-driven
//! rather than forced, matching spec.md's concurrency model note that
//! work should look like a single-threaded cooperative event loop per
//! worker, with blocking I/O dispatched out to a thread pool rather than
//! run on that loop.

pub mod error;
pub mod io;
pub mod tree;

pub use error::{WorkerError, WorkerResult};
pub use io::{Acceptor, Connection, IoState, Protocol};
pub use tree::{LifecycleSignal, WorkerId, WorkerKind, WorkerState, WorkerTree};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_full_shutdown_cycle_reaps_the_whole_subtree() {
        let (tree, root, _root_rx) = WorkerTree::new(WorkerKind::Manager);
        let (http_acceptor, mut acceptor_rx) = tree.spawn_child(root, WorkerKind::HttpAcceptor).unwrap();
        let (conn_a, mut conn_a_rx) = tree.spawn_child(http_acceptor, WorkerKind::HttpConnection).unwrap();
        let (conn_b, mut conn_b_rx) = tree.spawn_child(http_acceptor, WorkerKind::HttpConnection).unwrap();

        tree.shutdown(http_acceptor, true).unwrap();

        assert_eq!(acceptor_rx.try_recv(), Ok(LifecycleSignal::ShutdownAsap));
        assert_eq!(conn_a_rx.try_recv(), Ok(LifecycleSignal::ShutdownAsap));
        assert_eq!(conn_b_rx.try_recv(), Ok(LifecycleSignal::ShutdownAsap));

        // Connections finish in-flight work and clear themselves first.
        let reaped_conns = tree.detach_children(http_acceptor).unwrap();
        assert_eq!(reaped_conns.len(), 2);
        assert!(reaped_conns.contains(&conn_a));
        assert!(reaped_conns.contains(&conn_b));

        let reaped_acceptors = tree.detach_children(root).unwrap();
        assert_eq!(reaped_acceptors, vec![http_acceptor]);
        assert!(tree.children_of(root).unwrap().is_empty());
    }
}
