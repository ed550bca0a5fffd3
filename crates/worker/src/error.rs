//! Worker-tree error taxonomy.

use thiserror::Error;
use xapiand_core::error::XapiandError;

use crate::tree::WorkerId;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0:?} not found")]
    NotFound(WorkerId),

    #[error("worker {0:?} already destroyed")]
    AlreadyDestroyed(WorkerId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

impl From<WorkerError> for XapiandError {
    fn from(err: WorkerError) -> Self {
        XapiandError::Network(err.to_string())
    }
}
