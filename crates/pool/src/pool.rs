//! DatabasePool: two bounded LRUs of DatabaseQueue, keyed by endpoint
//! hash (spec.md §3, §4.D).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use xapiand_core::backend::{canonical_subpath, IndexBackendFactory, OpenFlags};
use xapiand_core::endpoint::Endpoints;
use xapiand_core::lru::{DropAction, Lru};

use xapiand_storage::WalSet;

use crate::error::{CheckoutError, CheckoutResult};
use crate::handle::IndexHandle;
use crate::queue::DatabaseQueue;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub writable_lru_size: usize,
    pub readable_lru_size: usize,
    pub writable_count_cap: usize,
    pub readable_count_cap: usize,
    pub checkout_timeout: Duration,
    pub max_retries: u32,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            writable_lru_size: 256,
            readable_lru_size: 1024,
            writable_count_cap: 1,
            readable_count_cap: 8,
            checkout_timeout: Duration::from_secs(10),
            max_retries: 3,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

struct PoolState {
    writable: Lru<u64, DatabaseQueue>,
    readable: Lru<u64, DatabaseQueue>,
    finished: bool,
}

/// Bounded checkout/checkin pool for `IndexHandle`s, sharded by endpoint
/// hash and writable/readable LRU (spec.md §4.D).
pub struct DatabasePool {
    root: PathBuf,
    factory: Arc<dyn IndexBackendFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    checkin_signal: Condvar,
}

impl DatabasePool {
    pub fn new(root: PathBuf, factory: Arc<dyn IndexBackendFactory>, config: PoolConfig) -> Self {
        DatabasePool {
            root,
            factory,
            state: Mutex::new(PoolState {
                writable: Lru::new(Some(config.writable_lru_size)),
                readable: Lru::new(Some(config.readable_lru_size)),
                finished: false,
            }),
            checkin_signal: Condvar::new(),
            config,
        }
    }

    /// Checkout(endpoints, flags) → IndexHandle (spec.md §4.D).
    pub fn checkout(&self, endpoints: &Endpoints, flags: OpenFlags) -> CheckoutResult<IndexHandle> {
        if endpoints.is_empty() {
            return Err(CheckoutError::EndpointNotAvailable);
        }
        let writable = flags.writable;
        let hash = endpoints.queue_hash(writable);
        let cap = if writable {
            self.config.writable_count_cap
        } else {
            self.config.readable_count_cap
        };

        let mut guard = self.state.lock();
        let mut attempts = 0u32;
        loop {
            if guard.finished {
                return Err(CheckoutError::PoolClosed);
            }

            let lru = if writable { &mut guard.writable } else { &mut guard.readable };
            ensure_queue(lru, hash, cap);

            let queue = lru.at_mut(&hash).expect("just ensured");
            if let Some(mut handle) = queue.pop_idle() {
                handle.mark_busy();
                return Ok(handle);
            }

            if queue.live_instances() < queue.count_cap() {
                queue.account_new_instance();
                drop(guard);
                let path = canonical_subpath(&self.root, &path_key(endpoints));
                let backend = self
                    .factory
                    .open(&path, flags)
                    .map_err(CheckoutError::Backend)?;
                let wal = if writable && !flags.disable_wal {
                    Some(open_wal_set(&path, backend.get_uuid()).map_err(CheckoutError::Io)?)
                } else {
                    None
                };
                let mut handle = IndexHandle::new(endpoints.clone(), writable, backend, wal, flags.synchronous_wal);
                handle.mark_busy();
                return Ok(handle);
            }

            if attempts >= self.config.max_retries {
                return Err(CheckoutError::Conflict);
            }
            attempts += 1;
            let timed_out = self
                .checkin_signal
                .wait_for(&mut guard, self.config.checkout_timeout)
                .timed_out();
            if timed_out && attempts >= self.config.max_retries {
                return Err(CheckoutError::Conflict);
            }
        }
    }

    /// Checkin(handle) (spec.md §4.D). `healthy` signals whether the
    /// handle should be returned to the idle queue or destroyed.
    pub fn checkin(&self, mut handle: IndexHandle, healthy: bool) {
        let hash = handle.endpoints().queue_hash(handle.is_writable());
        let writable = handle.is_writable();
        let mut guard = self.state.lock();
        let lru = if writable { &mut guard.writable } else { &mut guard.readable };
        if let Some(queue) = lru.at_mut(&hash) {
            if healthy {
                handle.mark_idle();
                queue.push_idle(handle);
            } else {
                queue.account_dropped_instance();
            }
        }
        drop(guard);
        self.checkin_signal.notify_all();
    }

    /// Background cleanup pass (spec.md §4.D "Cleanup"): drop idle
    /// handles that outlived the idle timeout in non-persistent queues.
    pub fn cleanup(&self) {
        let idle_timeout_ms = self.config.idle_timeout.as_millis() as u64;
        let mut guard = self.state.lock();
        for lru in [&mut guard.writable, &mut guard.readable] {
            let keys: Vec<u64> = lru.iter().map(|(k, _)| *k).collect();
            for key in keys {
                if let Some(queue) = lru.at_mut(&key) {
                    if !queue.persistent() {
                        queue.evict_idle_older_than(idle_timeout_ms);
                    }
                }
                if let Some(queue) = lru.peek(&key) {
                    if queue.is_empty() && !queue.persistent() {
                        lru.erase(&key);
                    }
                }
            }
        }
    }

    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.checkin_signal.notify_all();
    }

    pub fn set_persistent(&self, endpoints: &Endpoints, writable: bool, persistent: bool) {
        let hash = endpoints.queue_hash(writable);
        let mut guard = self.state.lock();
        let cap = if writable {
            self.config.writable_count_cap
        } else {
            self.config.readable_count_cap
        };
        let lru = if writable { &mut guard.writable } else { &mut guard.readable };
        ensure_queue(lru, hash, cap);
        if let Some(queue) = lru.at_mut(&hash) {
            queue.set_persistent(persistent);
        }
    }
}

/// Open (creating if needed) the `.wal/` directory sibling of a shard's
/// data path, for `IndexHandle`'s write-ahead journalling (spec.md §3
/// "one file per revision-slot-range", layered under the shard path
/// rather than the volume's own directory since the WAL is metadata
/// about the shard, not shard content itself).
fn open_wal_set(shard_path: &std::path::Path, uuid: [u8; 16]) -> std::io::Result<WalSet> {
    WalSet::new(shard_path.join(".wal"), uuid)
}

fn path_key(endpoints: &Endpoints) -> String {
    endpoints
        .write_target()
        .map(|e| e.path.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lookup-or-insert a fresh queue for `hash`, LRU-evicting non-persistent,
/// empty queues until capacity holds (spec.md §4.D step 2).
fn ensure_queue(lru: &mut Lru<u64, DatabaseQueue>, hash: u64, count_cap: usize) {
    if lru.exists(&hash) {
        return;
    }
    lru.insert_and(hash, DatabaseQueue::new(count_cap), |queue, _size, _max| {
        if queue.is_empty() && !queue.persistent() {
            DropAction::Evict
        } else {
            DropAction::Leave
        }
    });
}
