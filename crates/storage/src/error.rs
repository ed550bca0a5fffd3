//! Storage Volume / WAL error taxonomy (spec.md §4.B, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage volume EOF: offset exceeds the last-block limit")]
    Eof,

    #[error("UUID mismatch: expected {expected}, found {found}")]
    UuidMismatch { expected: String, found: String },

    #[error("bad storage header magic number")]
    BadHeaderMagicNumber,

    #[error("bad bin header magic number")]
    BadBinHeaderMagicNumber,

    #[error("bad bin footer magic number")]
    BadBinFooterMagicNumber,

    #[error("bad bin checksum")]
    BadBinChecksum,

    #[error("incomplete bin data: expected {expected} bytes, read {read}")]
    IncompleteBinData { expected: usize, read: usize },

    #[error("record not found (deleted) at offset {0}")]
    NotFound(u32),

    #[error("corrupt volume: {0}")]
    CorruptVolume(String),

    #[error("backend error during WAL replay: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for xapiand_core::XapiandError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(io) => xapiand_core::XapiandError::Io(io),
            StorageError::UuidMismatch { expected, found } => {
                xapiand_core::XapiandError::UuidMismatch { expected, found }
            }
            other => xapiand_core::XapiandError::CorruptVolume(other.to_string()),
        }
    }
}
