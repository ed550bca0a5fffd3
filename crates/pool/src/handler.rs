//! DatabaseHandler: a document-level facade over checkout/checkin.
//!
//! Grounded on `original_source/src/database/handler.h`, which layers
//! `get_document`/`index`/`patch`/`update`/`delete_document` over the raw
//! checkout/checkin pair. `SchemasLRU::get` (schema crate) needs exactly
//! `get_document` to resolve foreign schema links, so this facade exists
//! to make that call possible without reaching past the pool's mutex.

use std::sync::Arc;

use xapiand_core::backend::{BackendResult, OpenFlags};
use xapiand_core::endpoint::Endpoints;

use crate::error::CheckoutResult;
use crate::handle::IndexHandle;
use crate::pool::DatabasePool;

pub struct DatabaseHandler {
    pool: Arc<DatabasePool>,
    endpoints: Endpoints,
}

impl DatabaseHandler {
    pub fn new(pool: Arc<DatabasePool>, endpoints: Endpoints) -> Self {
        DatabaseHandler { pool, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn get_document(&self, docid: u64) -> CheckoutResult<Option<Vec<u8>>> {
        self.with_readable(|handle| handle.get_document(docid))
    }

    pub fn index(&self, doc: &[u8]) -> CheckoutResult<u64> {
        self.with_writable(|handle| handle.add_document(doc))
    }

    pub fn patch(&self, docid: u64, doc: &[u8]) -> CheckoutResult<()> {
        self.with_writable(|handle| handle.replace_document(docid, doc))
    }

    pub fn update(&self, term: &str, doc: &[u8]) -> CheckoutResult<u64> {
        self.with_writable(|handle| handle.replace_document_term(term, doc))
    }

    pub fn delete_document(&self, docid: u64) -> CheckoutResult<()> {
        self.with_writable(|handle| handle.delete_document(docid))
    }

    pub fn delete_document_term(&self, term: &str) -> CheckoutResult<()> {
        self.with_writable(|handle| handle.delete_document_term(term))
    }

    pub fn commit(&self) -> CheckoutResult<u64> {
        self.with_writable(|handle| handle.commit())
    }

    pub fn get_metadata(&self, key: &str) -> CheckoutResult<Option<Vec<u8>>> {
        self.with_readable(|handle| handle.get_metadata(key))
    }

    /// The backend revision this endpoint's writable handle is currently
    /// at, used as `GET_CHANGESETS`'s `from_revision` (spec.md §4.G).
    pub fn revision(&self) -> CheckoutResult<u64> {
        self.with_readable(|handle| Ok(handle.revision()))
    }

    pub fn uuid(&self) -> CheckoutResult<[u8; 16]> {
        self.with_readable(|handle| Ok(handle.backend().get_uuid()))
    }

    /// Apply one WAL line received over the pull-replication protocol
    /// (spec.md §4.G).
    pub fn apply_remote_wal_line(&self, revision: u64, line: &xapiand_storage::WalLine) -> CheckoutResult<()> {
        self.with_writable(|handle| handle.apply_remote_wal_line(revision, line))
    }

    pub fn set_metadata(&self, key: &str, value: &[u8], if_empty: bool) -> CheckoutResult<bool> {
        self.with_writable(|handle| handle.set_metadata(key, value, if_empty))
    }

    fn with_readable<T>(&self, f: impl FnOnce(&IndexHandle) -> BackendResult<T>) -> CheckoutResult<T> {
        let handle = self.pool.checkout(&self.endpoints, OpenFlags::readable())?;
        let result = f(&handle);
        let healthy = result.is_ok();
        self.pool.checkin(handle, healthy);
        Ok(result?)
    }

    fn with_writable<T>(&self, f: impl FnOnce(&mut IndexHandle) -> BackendResult<T>) -> CheckoutResult<T> {
        let mut handle = self.pool.checkout(&self.endpoints, OpenFlags::writable())?;
        let result = f(&mut handle);
        let healthy = result.is_ok();
        self.pool.checkin(handle, healthy);
        Ok(result?)
    }
}
