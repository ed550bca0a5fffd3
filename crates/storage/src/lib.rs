//! Append-only Storage Volumes and the Write-Ahead Log built on top of
//! them (spec.md §4.B, §4.C).

pub mod error;
pub mod record;
pub mod volume;
pub mod wal;

pub use error::{StorageError, StorageResult};
pub use volume::{StorageVolume, ALIGNMENT, BLOCK_SIZE, START_BLOCK_OFFSET, STORAGE_MAGIC};
pub use wal::{replay, Wal, WalLine, WalSet, WAL_SLOTS};
