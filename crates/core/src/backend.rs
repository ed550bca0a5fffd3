//! The `IndexBackend` contract (spec.md §6).
//!
//! The inverted-index engine itself is out of scope (spec.md §1): this
//! module only names the operations every backend must expose, plus a
//! `MemoryBackend` test double — grounded on the teacher's own pattern of
//! shipping a simplified reference model for property tests
//! (`strata-storage::testing::reference_model`) — so the pool, WAL replay
//! and schema-cache logic have something real to drive in unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("document not found: {0}")]
    NotFound(u64),
    #[error("metadata key already set: {0}")]
    MetadataExists(String),

    #[error("WAL append failed: {0}")]
    Wal(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Flags governing how a shard is opened (spec.md §4.D `Checkout`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub open: bool,
    pub create_or_open: bool,
    pub writable: bool,
    pub disable_wal: bool,
    pub synchronous_wal: bool,
}

impl OpenFlags {
    pub fn writable() -> Self {
        OpenFlags {
            open: true,
            create_or_open: true,
            writable: true,
            ..Default::default()
        }
    }

    pub fn readable() -> Self {
        OpenFlags {
            open: true,
            ..Default::default()
        }
    }
}

/// Operations every index backend must expose (spec.md §6).
///
/// Revisions are monotonic per shard.
pub trait IndexBackend: Send {
    fn add_document(&mut self, doc: &[u8]) -> BackendResult<u64>;
    fn replace_document(&mut self, docid: u64, doc: &[u8]) -> BackendResult<()>;
    fn replace_document_term(&mut self, term: &str, doc: &[u8]) -> BackendResult<u64>;
    fn delete_document(&mut self, docid: u64) -> BackendResult<()>;
    fn delete_document_term(&mut self, term: &str) -> BackendResult<()>;
    fn commit(&mut self) -> BackendResult<u64>;
    fn reopen(&mut self) -> BackendResult<()>;
    fn get_metadata(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;
    fn set_metadata(&mut self, key: &str, value: &[u8], if_empty: bool) -> BackendResult<bool>;
    fn get_revision(&self) -> u64;
    fn get_uuid(&self) -> [u8; 16];
    fn get_document(&self, docid: u64) -> BackendResult<Option<Vec<u8>>>;
}

/// Opens backend instances for a path. Production code plugs in a
/// Xapian-backed (or equivalent) implementation; tests use
/// `MemoryBackendFactory`.
pub trait IndexBackendFactory: Send + Sync {
    fn open(&self, path: &Path, flags: OpenFlags) -> BackendResult<Box<dyn IndexBackend>>;
}

/// In-memory reference backend for tests.
pub struct MemoryBackend {
    uuid: [u8; 16],
    revision: u64,
    documents: HashMap<u64, Vec<u8>>,
    terms: HashMap<String, u64>,
    metadata: HashMap<String, Vec<u8>>,
    next_docid: u64,
}

impl MemoryBackend {
    pub fn new(uuid: [u8; 16]) -> Self {
        MemoryBackend {
            uuid,
            revision: 0,
            documents: HashMap::new(),
            terms: HashMap::new(),
            metadata: HashMap::new(),
            next_docid: 1,
        }
    }
}

impl IndexBackend for MemoryBackend {
    fn add_document(&mut self, doc: &[u8]) -> BackendResult<u64> {
        let docid = self.next_docid;
        self.next_docid += 1;
        self.documents.insert(docid, doc.to_vec());
        Ok(docid)
    }

    fn replace_document(&mut self, docid: u64, doc: &[u8]) -> BackendResult<()> {
        self.documents.insert(docid, doc.to_vec());
        self.next_docid = self.next_docid.max(docid + 1);
        Ok(())
    }

    fn replace_document_term(&mut self, term: &str, doc: &[u8]) -> BackendResult<u64> {
        let docid = *self.terms.entry(term.to_string()).or_insert_with(|| {
            let id = self.next_docid;
            self.next_docid += 1;
            id
        });
        self.documents.insert(docid, doc.to_vec());
        Ok(docid)
    }

    fn delete_document(&mut self, docid: u64) -> BackendResult<()> {
        self.documents.remove(&docid);
        Ok(())
    }

    fn delete_document_term(&mut self, term: &str) -> BackendResult<()> {
        if let Some(docid) = self.terms.remove(term) {
            self.documents.remove(&docid);
        }
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<u64> {
        self.revision += 1;
        Ok(self.revision)
    }

    fn reopen(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.metadata.get(key).cloned())
    }

    fn set_metadata(&mut self, key: &str, value: &[u8], if_empty: bool) -> BackendResult<bool> {
        if if_empty && self.metadata.contains_key(key) {
            return Ok(false);
        }
        self.metadata.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    fn get_revision(&self) -> u64 {
        self.revision
    }

    fn get_uuid(&self) -> [u8; 16] {
        self.uuid
    }

    fn get_document(&self, docid: u64) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.documents.get(&docid).cloned())
    }
}

#[derive(Default)]
pub struct MemoryBackendFactory;

impl IndexBackendFactory for MemoryBackendFactory {
    fn open(&self, _path: &Path, _flags: OpenFlags) -> BackendResult<Box<dyn IndexBackend>> {
        Ok(Box::new(MemoryBackend::new(*uuid::Uuid::new_v4().as_bytes())))
    }
}

pub fn canonical_subpath(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}
