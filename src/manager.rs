//! `XapiandManager`: the single explicit handle composing every
//! subsystem crate (spec.md §9 "no thread-local or static-storage state
//! for per-request context — pass an explicit context/handle").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use xapiand_core::backend::IndexBackendFactory;
use xapiand_core::endpoint::{Endpoint, Endpoints};
use xapiand_core::error::XapiandError;
use xapiand_core::lru::Lru;
use xapiand_discovery::{GossipService, PullRequest};
use xapiand_pool::{DatabaseHandler, DatabasePool};
use xapiand_scheduler::{Debouncer, Scheduler};
use xapiand_schema::SchemasLRU;
use xapiand_worker::{WorkerKind, WorkerTree};

use crate::config::ManagerConfig;

/// How often the background pump drains the commit debouncer
/// (spec.md §4.F pairs the debouncer with a driver that polls it; the
/// scheduler crate itself only defines `run_once`, not the polling loop).
const DEBOUNCE_PUMP_INTERVAL_MS: u64 = 100;

/// Size of `resolve_index_endpoints`'s memoization table (spec.md §6
/// "Resolve API": "Its result is memoized in a 1000-entry LRU keyed by
/// `path + "/"`.").
const RESOLVE_CACHE_CAPACITY: usize = 1000;

pub struct XapiandManager {
    config: ManagerConfig,
    pool: Arc<DatabasePool>,
    schemas: Arc<SchemasLRU>,
    scheduler: Arc<Scheduler>,
    commit_debouncer: Arc<Debouncer<Endpoints>>,
    gossip: Option<Arc<GossipService>>,
    resolve_cache: Mutex<Lru<String, Vec<Endpoint>>>,
    workers: WorkerTree,
    root_worker: xapiand_worker::WorkerId,
    scheduler_thread: Mutex<Option<JoinHandle<()>>>,
    pump_thread: Mutex<Option<JoinHandle<()>>>,
    pump_stopping: Arc<AtomicBool>,
}

impl XapiandManager {
    /// Build every subsystem and start their driver threads, but do not
    /// bind the discovery socket yet (binding is async; see `start`).
    fn assemble(config: ManagerConfig, factory: Arc<dyn IndexBackendFactory>) -> Self {
        let pool = Arc::new(DatabasePool::new(config.data_path.clone(), factory, config.pool_config()));
        let schemas = Arc::new(SchemasLRU::new(pool.clone(), config.schema_cache_capacity));
        let scheduler = Scheduler::new(config.scheduler_workers);

        let debounce_pool = pool.clone();
        let commit_debouncer = Debouncer::new(move |endpoints: &Endpoints| {
            let handler = DatabaseHandler::new(debounce_pool.clone(), endpoints.clone());
            if let Err(err) = handler.commit() {
                warn!(?err, "debounced commit failed");
            }
        });

        let (workers, root_worker, _root_signals) = WorkerTree::new(WorkerKind::Manager);

        let scheduler_thread = Mutex::new(Some(scheduler.spawn()));

        let pump_stopping = Arc::new(AtomicBool::new(false));
        let pump_debouncer = commit_debouncer.clone();
        let pump_flag = pump_stopping.clone();
        let pump_thread = Mutex::new(Some(std::thread::spawn(move || {
            while !pump_flag.load(Ordering::SeqCst) {
                pump_debouncer.run_once();
                std::thread::sleep(Duration::from_millis(DEBOUNCE_PUMP_INTERVAL_MS));
            }
        })));

        XapiandManager {
            config,
            pool,
            schemas,
            scheduler,
            commit_debouncer,
            gossip: None,
            resolve_cache: Mutex::new(Lru::new(Some(RESOLVE_CACHE_CAPACITY))),
            workers,
            root_worker,
            scheduler_thread,
            pump_thread,
            pump_stopping,
        }
    }

    /// Assemble the manager and bind its discovery socket. Returns the
    /// manager together with the channel of `PullRequest`s the caller is
    /// responsible for servicing (spec.md §4.G pull replication — the
    /// manager only schedules pulls, it does not itself own the
    /// connection pool needed to perform them).
    pub async fn start(
        config: ManagerConfig,
        factory: Arc<dyn IndexBackendFactory>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PullRequest>), XapiandError> {
        let mut manager = Self::assemble(config, factory);
        let local_host = manager.config.discovery_bind.ip().to_string();
        let (gossip, pulls) = GossipService::bind(
            manager.config.discovery_bind,
            manager.config.discovery_broadcast,
            manager.config.cluster_name.clone(),
            &local_host,
            manager.config.http_port,
            manager.config.binary_port,
            manager.config.node_name.clone(),
            manager.config.num_replicas,
        )
        .await?;
        manager.gossip = Some(gossip);
        Ok((Arc::new(manager), pulls))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    pub fn schemas(&self) -> &Arc<SchemasLRU> {
        &self.schemas
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn gossip(&self) -> Option<&Arc<GossipService>> {
        self.gossip.as_ref()
    }

    pub fn handler_for(&self, endpoints: Endpoints) -> DatabaseHandler {
        DatabaseHandler::new(self.pool.clone(), endpoints)
    }

    /// Ingest entry point tying **D** and **E** together (spec.md §2 data
    /// flow: "D checks out a writable IndexHandle ... E resolves (and
    /// possibly persists) the schema ... the handle writes to the
    /// IndexBackend"). `doc` is a JSON document body; newly observed
    /// top-level fields are CAS-merged into the owning schema before the
    /// document itself is written (spec.md S1/S2).
    pub fn index_document(&self, endpoints: Endpoints, doc: &[u8]) -> Result<u64, XapiandError> {
        let handler = self.handler_for(endpoints);
        let (pointer, _provenance, foreign_uri) = self.schemas.get(&handler, None)?;

        let observed = xapiand_schema::infer_field_types(doc);
        if !observed.is_empty() {
            let mut current = pointer;
            while let Some(merged) = xapiand_schema::merge_fields(&current.body, &observed) {
                let winner = match &foreign_uri {
                    Some(uri) => self.schemas.set_foreign(uri, &current, merged.clone())?,
                    None => self.schemas.set_local(&handler, &current, merged.clone())?,
                };
                if winner.body == merged {
                    break;
                }
                current = winner;
            }
        }

        Ok(handler.index(doc)?)
    }

    /// The boundary between the manager and every caller that needs
    /// shards for a path (spec.md §6 "Resolve API"): resolve `endpoint`
    /// to its ordered replica set via the cluster's consistent-hash
    /// placement, falling back to the endpoint itself when discovery
    /// isn't bound or no peer is known for it yet. `writable` narrows the
    /// result to just the write target, matching the `DatabaseHandler`
    /// convention that the first endpoint in a set is where writes land.
    pub fn resolve_index_endpoints(&self, endpoint: &Endpoint, writable: bool) -> Vec<Endpoint> {
        let key = format!("{}/", endpoint.path.display());
        let resolved = {
            let mut cache = self.resolve_cache.lock();
            if let Some(hit) = cache.at(&key) {
                hit.clone()
            } else {
                let computed = match &self.gossip {
                    Some(gossip) => {
                        let found = gossip.replica_endpoints(&endpoint.path.to_string_lossy());
                        if found.is_empty() {
                            vec![endpoint.clone()]
                        } else {
                            found
                        }
                    }
                    None => vec![endpoint.clone()],
                };
                cache.insert(key, computed.clone());
                computed
            }
        };
        if writable {
            resolved.into_iter().take(1).collect()
        } else {
            resolved
        }
    }

    /// Request a debounced commit for `endpoints`, then (once it fires)
    /// broadcast `DB_UPDATED` so replicas schedule a pull (spec.md §4.G
    /// data-flow: "on commit, G broadcasts DB_UPDATED").
    pub fn request_commit(&self, endpoints: Endpoints) {
        self.commit_debouncer.request(endpoints);
    }

    pub async fn announce_commit(&self, path: impl Into<String>) -> Result<(), XapiandError> {
        match &self.gossip {
            Some(gossip) => gossip.announce_commit(path).await.map_err(XapiandError::from),
            None => Ok(()),
        }
    }

    /// Run the gossip service's receive loop. Returns only on a fatal FSM
    /// transition or I/O error; callers typically spawn this as its own
    /// task alongside their HTTP/binary acceptor loops.
    pub async fn run_discovery(self: &Arc<Self>) -> Result<(), XapiandError> {
        match &self.gossip {
            Some(gossip) => gossip.run().await.map_err(XapiandError::from),
            None => Ok(()),
        }
    }

    pub fn worker_tree(&self) -> &WorkerTree {
        &self.workers
    }

    pub fn root_worker(&self) -> xapiand_worker::WorkerId {
        self.root_worker
    }

    /// Graceful shutdown: ask every top-level worker to stop, stop the
    /// scheduler and debounce pump, and wait for their driver threads.
    pub fn shutdown(&self, asap: bool) {
        info!(asap, "shutting down xapiand manager");
        let _ = self.workers.shutdown(self.root_worker, asap);

        self.scheduler.stop();
        self.pump_stopping.store(true, Ordering::SeqCst);

        if let Some(handle) = self.scheduler_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.pump_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Address pair a node gossips about itself under (spec.md §3 Node).
pub fn http_and_binary_addrs(config: &ManagerConfig) -> (SocketAddr, SocketAddr) {
    let ip = config.discovery_bind.ip();
    (SocketAddr::new(ip, config.http_port), SocketAddr::new(ip, config.binary_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xapiand_core::backend::MemoryBackendFactory;

    /// `IndexHandle` now journals real WAL files under `data_path`
    /// (xapiand-pool's handle.rs), so tests need a throwaway root rather
    /// than the default `./data` relative to the test binary's cwd.
    fn test_config() -> ManagerConfig {
        let mut config = ManagerConfig::default();
        config.data_path = tempfile::tempdir().unwrap().into_path();
        config.discovery_bind = "127.0.0.1:0".parse().unwrap();
        config.discovery_broadcast = "127.0.0.1:19998".parse().unwrap();
        config.scheduler_workers = 0;
        config
    }

    #[tokio::test]
    async fn manager_starts_and_shuts_down_cleanly() {
        let (manager, _pulls) = XapiandManager::start(test_config(), Arc::new(MemoryBackendFactory)).await.unwrap();
        assert!(manager.gossip().is_some());
        manager.shutdown(true);
    }

    #[tokio::test]
    async fn handler_round_trips_through_the_manager_pool() {
        let (manager, _pulls) = XapiandManager::start(test_config(), Arc::new(MemoryBackendFactory)).await.unwrap();
        let endpoints = Endpoints::single(xapiand_core::endpoint::Endpoint::local("/idx-manager-test"));
        let handler = manager.handler_for(endpoints);
        let docid = handler.index(b"hello").unwrap();
        assert_eq!(handler.get_document(docid).unwrap(), Some(b"hello".to_vec()));
        manager.shutdown(true);
    }

    #[tokio::test]
    async fn index_document_infers_and_persists_a_field_schema() {
        // S1: `PUT /idx/1 {"a":1}` must leave `_schema` containing a
        // field `a:integer`. Indexed against `.xapiand/index` directly
        // since any other path resolves to a foreign link there (the
        // field-inference CAS targets whichever cache tier `get` actually
        // resolved the schema from).
        let (manager, _pulls) = XapiandManager::start(test_config(), Arc::new(MemoryBackendFactory)).await.unwrap();
        let endpoints = Endpoints::single(xapiand_core::endpoint::Endpoint::local(".xapiand/index"));

        let docid = manager.index_document(endpoints.clone(), br#"{"a":1}"#).unwrap();

        let handler = manager.handler_for(endpoints);
        assert_eq!(handler.get_document(docid).unwrap(), Some(br#"{"a":1}"#.to_vec()));
        let stored = handler.get_metadata("_schema").unwrap().unwrap();
        let body = xapiand_schema::SchemaPointer::deserialise(&stored).unwrap();
        match body {
            xapiand_schema::SchemaBody::Local(value) => {
                assert_eq!(value["fields"]["a"], "integer");
            }
            xapiand_schema::SchemaBody::Foreign(_) => panic!("bootstrap path must resolve to a local schema"),
        }

        manager.shutdown(true);
    }

    #[tokio::test]
    async fn resolve_index_endpoints_falls_back_to_the_endpoint_itself_alone() {
        // A single-node cluster has no peers to place replicas on beyond
        // the endpoint as given, so resolution is a pass-through.
        let (manager, _pulls) = XapiandManager::start(test_config(), Arc::new(MemoryBackendFactory)).await.unwrap();
        let endpoint = xapiand_core::endpoint::Endpoint::local("/idx-resolve-test");

        let for_read = manager.resolve_index_endpoints(&endpoint, false);
        assert_eq!(for_read.len(), 1);
        assert_eq!(for_read[0].path, endpoint.path);

        let for_write = manager.resolve_index_endpoints(&endpoint, true);
        assert_eq!(for_write.len(), 1);

        manager.shutdown(true);
    }

    #[tokio::test]
    async fn resolve_index_endpoints_memoizes_by_path() {
        let (manager, _pulls) = XapiandManager::start(test_config(), Arc::new(MemoryBackendFactory)).await.unwrap();
        let endpoint = xapiand_core::endpoint::Endpoint::local("/idx-resolve-cache-test");

        let first = manager.resolve_index_endpoints(&endpoint, false);
        assert_eq!(manager.resolve_cache.lock().len(), 1);
        let second = manager.resolve_index_endpoints(&endpoint, false);
        assert_eq!(first, second);
        assert_eq!(manager.resolve_cache.lock().len(), 1, "repeat lookups must not grow the cache");

        manager.shutdown(true);
    }
}
