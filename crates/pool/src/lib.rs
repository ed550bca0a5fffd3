//! IndexHandle, DatabaseQueue, DatabasePool and the DatabaseHandler
//! facade (spec.md §4.D).

pub mod error;
pub mod handle;
pub mod handler;
pub mod pool;
pub mod queue;

pub use error::{CheckoutError, CheckoutResult};
pub use handle::IndexHandle;
pub use handler::DatabaseHandler;
pub use pool::{DatabasePool, PoolConfig};
pub use queue::DatabaseQueue;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tempfile::TempDir;
    use xapiand_core::backend::{MemoryBackendFactory, OpenFlags};
    use xapiand_core::endpoint::{Endpoint, Endpoints};

    use super::*;

    fn endpoints(path: &str) -> Endpoints {
        Endpoints::single(Endpoint::local(path))
    }

    /// `IndexHandle` now journals to a real `.wal/` directory on disk
    /// (handle.rs), so pool tests need a throwaway root instead of the
    /// shared `/tmp` path the teacher's own fixtures sometimes use.
    fn scratch_root() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        (dir, path)
    }

    fn fast_config() -> PoolConfig {
        PoolConfig {
            checkout_timeout: std::time::Duration::from_millis(5),
            max_retries: 1,
            ..PoolConfig::default()
        }
    }

    #[test]
    fn writable_checkout_is_exclusive_until_checkin() {
        let (_root, root) = scratch_root();
        let pool = DatabasePool::new(root, Arc::new(MemoryBackendFactory), fast_config());
        let eps = endpoints("/db-a");
        let handle = pool.checkout(&eps, OpenFlags::writable()).unwrap();
        assert!(handle.is_busy());

        let second = pool.checkout(&eps, OpenFlags::writable());
        assert!(matches!(second, Err(CheckoutError::Conflict)));

        pool.checkin(handle, true);
        let third = pool.checkout(&eps, OpenFlags::writable());
        assert!(third.is_ok());
    }

    #[test]
    fn readable_handles_are_reused_not_multiplied_past_cap() {
        let mut config = fast_config();
        config.readable_count_cap = 2;
        let (_root, root) = scratch_root();
        let pool = DatabasePool::new(root, Arc::new(MemoryBackendFactory), config);
        let eps = endpoints("/db-b");

        let h1 = pool.checkout(&eps, OpenFlags::readable()).unwrap();
        let h2 = pool.checkout(&eps, OpenFlags::readable()).unwrap();
        let third = pool.checkout(&eps, OpenFlags::readable());
        assert!(matches!(third, Err(CheckoutError::Conflict)));

        pool.checkin(h1, true);
        assert!(pool.checkout(&eps, OpenFlags::readable()).is_ok());
        pool.checkin(h2, true);
    }

    #[test]
    fn checkout_after_finish_is_rejected() {
        let (_root, root) = scratch_root();
        let pool = DatabasePool::new(root, Arc::new(MemoryBackendFactory), PoolConfig::default());
        pool.finish();
        let eps = endpoints("/db-c");
        assert!(matches!(pool.checkout(&eps, OpenFlags::writable()), Err(CheckoutError::PoolClosed)));
    }

    #[test]
    fn empty_endpoints_reject_before_locking() {
        let (_root, root) = scratch_root();
        let pool = DatabasePool::new(root, Arc::new(MemoryBackendFactory), PoolConfig::default());
        let eps = Endpoints::new(vec![]);
        assert!(matches!(
            pool.checkout(&eps, OpenFlags::writable()),
            Err(CheckoutError::EndpointNotAvailable)
        ));
    }

    #[test]
    fn unhealthy_checkin_destroys_instance_and_frees_capacity() {
        let mut config = PoolConfig::default();
        config.writable_count_cap = 1;
        let (_root, root) = scratch_root();
        let pool = DatabasePool::new(root, Arc::new(MemoryBackendFactory), config);
        let eps = endpoints("/db-d");
        let handle = pool.checkout(&eps, OpenFlags::writable()).unwrap();
        pool.checkin(handle, false);
        // live_instances dropped back to 0, so a fresh checkout should succeed immediately.
        assert!(pool.checkout(&eps, OpenFlags::writable()).is_ok());
    }

    #[test]
    fn database_handler_round_trips_a_document() {
        let (_root, root) = scratch_root();
        let pool = Arc::new(DatabasePool::new(
            root,
            Arc::new(MemoryBackendFactory),
            PoolConfig::default(),
        ));
        let eps = endpoints("/db-e");
        let handler = DatabaseHandler::new(pool, eps);
        let docid = handler.index(b"hello world").unwrap();
        assert_eq!(handler.get_document(docid).unwrap().unwrap(), b"hello world");
    }
}
