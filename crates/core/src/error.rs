//! Root error taxonomy.
//!
//! Each subsystem crate defines its own `thiserror` enum; this is the
//! aggregate type the manager boundary converts into, mirroring the way
//! the teacher's `DatabaseHandleError`/`CheckpointError` pair layers a
//! crate-local error under a coarser one at the call site that needs it.

use thiserror::Error;

/// Abstract error kinds shared across the whole workspace (spec.md §7).
#[derive(Debug, Error)]
pub enum XapiandError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt volume: {0}")]
    CorruptVolume(String),

    #[error("UUID mismatch: expected {expected}, found {found}")]
    UuidMismatch { expected: String, found: String },

    #[error("checkout error: {0}")]
    Checkout(String),

    #[error("document version conflict")]
    DocVersionConflict,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

pub type Result<T> = std::result::Result<T, XapiandError>;
