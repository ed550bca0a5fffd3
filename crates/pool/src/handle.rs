//! IndexHandle: one open IndexBackend plus checkout bookkeeping
//! (spec.md §3, §4.D).
//!
//! When the checkout wasn't opened with `DISABLE_WAL`, every mutating
//! operation is also journalled to a `WalSet` before it's considered
//! complete (spec.md §2 data flow: "the handle writes to the
//! IndexBackend → C appends a WAL line"). `SYNCHRONOUS_WAL` additionally
//! fsyncs the WAL file inline instead of leaving that to the fsync
//! debouncer (§4.F).

use xapiand_core::backend::{BackendError, BackendResult, IndexBackend};
use xapiand_core::endpoint::Endpoints;
use xapiand_core::node::now_ms;
use xapiand_storage::{WalLine, WalSet};

/// Owns one open `IndexBackend` instance plus the metadata the pool needs
/// to decide when it is safe to evict or reuse it.
pub struct IndexHandle {
    endpoints: Endpoints,
    writable: bool,
    backend: Box<dyn IndexBackend>,
    wal: Option<WalSet>,
    synchronous_wal: bool,
    wal_revision: u64,
    last_access_ms: u64,
    mastery_level: i64,
    checkout_revision: u64,
    busy: bool,
}

impl IndexHandle {
    pub fn new(
        endpoints: Endpoints,
        writable: bool,
        backend: Box<dyn IndexBackend>,
        wal: Option<WalSet>,
        synchronous_wal: bool,
    ) -> Self {
        let checkout_revision = backend.get_revision();
        IndexHandle {
            endpoints,
            writable,
            wal_revision: checkout_revision,
            backend,
            wal,
            synchronous_wal,
            last_access_ms: now_ms(),
            mastery_level: 0,
            checkout_revision,
            busy: false,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn mark_busy(&mut self) {
        self.busy = true;
        self.last_access_ms = now_ms();
    }

    pub(crate) fn mark_idle(&mut self) {
        self.busy = false;
        self.last_access_ms = now_ms();
    }

    pub fn idle_for_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_access_ms)
    }

    pub fn mastery_level(&self) -> i64 {
        self.mastery_level
    }

    pub fn set_mastery_level(&mut self, level: i64) {
        self.mastery_level = level;
    }

    pub fn checkout_revision(&self) -> u64 {
        self.checkout_revision
    }

    pub fn revision(&self) -> u64 {
        self.backend.get_revision()
    }

    pub fn backend(&self) -> &dyn IndexBackend {
        self.backend.as_ref()
    }

    /// Append `line` to this handle's WAL, tagged at the revision the
    /// backend is currently accumulating (i.e. not yet committed). A
    /// no-op when the checkout disabled the WAL (`DISABLE_WAL`).
    fn wal_append(&mut self, line: &WalLine) -> BackendResult<()> {
        let Some(wal) = &self.wal else { return Ok(()) };
        let mut writer = wal
            .writer_for(self.wal_revision)
            .map_err(|e| BackendError::Wal(e.to_string()))?;
        writer
            .write_line(self.wal_revision, line)
            .map_err(|e| BackendError::Wal(e.to_string()))?;
        if self.synchronous_wal {
            writer.fdatasync().map_err(|e| BackendError::Wal(e.to_string()))?;
        }
        Ok(())
    }

    pub fn add_document(&mut self, doc: &[u8]) -> BackendResult<u64> {
        let docid = self.backend.add_document(doc)?;
        self.wal_append(&WalLine::AddDocument { doc: doc.to_vec() })?;
        Ok(docid)
    }

    pub fn replace_document(&mut self, docid: u64, doc: &[u8]) -> BackendResult<()> {
        self.backend.replace_document(docid, doc)?;
        self.wal_append(&WalLine::ReplaceDocument {
            docid: docid as u32,
            doc: doc.to_vec(),
        })?;
        Ok(())
    }

    pub fn replace_document_term(&mut self, term: &str, doc: &[u8]) -> BackendResult<u64> {
        let docid = self.backend.replace_document_term(term, doc)?;
        self.wal_append(&WalLine::ReplaceDocumentTerm {
            term: term.to_string(),
            doc: doc.to_vec(),
        })?;
        Ok(docid)
    }

    pub fn delete_document(&mut self, docid: u64) -> BackendResult<()> {
        self.backend.delete_document(docid)?;
        self.wal_append(&WalLine::DeleteDocument { docid: docid as u32 })?;
        Ok(())
    }

    pub fn delete_document_term(&mut self, term: &str) -> BackendResult<()> {
        self.backend.delete_document_term(term)?;
        self.wal_append(&WalLine::DeleteDocumentTerm { term: term.to_string() })?;
        Ok(())
    }

    pub fn get_document(&self, docid: u64) -> BackendResult<Option<Vec<u8>>> {
        self.backend.get_document(docid)
    }

    pub fn get_metadata(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.backend.get_metadata(key)
    }

    pub fn set_metadata(&mut self, key: &str, value: &[u8], if_empty: bool) -> BackendResult<bool> {
        let applied = self.backend.set_metadata(key, value, if_empty)?;
        if applied {
            self.wal_append(&WalLine::SetMetadata {
                key: key.to_string(),
                value: value.to_vec(),
            })?;
        }
        Ok(applied)
    }

    /// Commit the backend and journal the resulting revision, advancing
    /// the handle's WAL cursor past it (spec.md §4.C write path).
    pub fn commit(&mut self) -> BackendResult<u64> {
        let new_revision = self.backend.commit()?;
        self.wal_append(&WalLine::Commit { revision: new_revision })?;
        self.wal_revision = new_revision;
        Ok(new_revision)
    }

    /// Apply one WAL line pulled from a remote peer (spec.md §4.G pull
    /// replication): replay it against the backend and journal it into
    /// this handle's own WAL, so a peer pulling from this node in turn
    /// observes the same line.
    pub fn apply_remote_wal_line(&mut self, revision: u64, line: &WalLine) -> BackendResult<()> {
        line.apply(self.backend.as_mut()).map_err(|e| BackendError::Wal(e.to_string()))?;
        self.wal_revision = revision;
        self.wal_append(line)?;
        Ok(())
    }

    pub fn reopen(&mut self) -> BackendResult<()> {
        self.backend.reopen()
    }
}
