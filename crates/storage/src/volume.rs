//! Append-only, block-aligned Storage Volume (spec.md §4.B).
//!
//! Layout grounded on `examples/original_source/src/storage.h`: a 4 KiB
//! header block followed by framed records aligned to 8-byte units,
//! starting at `header.head.offset * ALIGNMENT`.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{StorageError, StorageResult};
use crate::record::{decode_record, encode_record, record_padded_len};

pub const STORAGE_MAGIC: u32 = 0x1234_5678;
pub const BIN_HEADER_MAGIC: u8 = 0x12;
pub const BIN_FOOTER_MAGIC: u8 = 0x15;
pub const BLOCK_SIZE: u64 = 4096;
pub const ALIGNMENT: u64 = 8;
pub const START_BLOCK_OFFSET: u16 = (BLOCK_SIZE / ALIGNMENT) as u16;
/// `header.head.offset` is a u32 count of alignment units; the last valid
/// byte offset is thus `u32::MAX * ALIGNMENT`.
pub const LAST_BLOCK_OFFSET: u64 = u32::MAX as u64 * ALIGNMENT;

const HEAD_SIZE: usize = 4 /* magic */ + 4 /* offset */ + 36 /* uuid */;

pub const FLAG_DELETED: u8 = 0b0000_0001;
pub const FLAG_COMPRESSED: u8 = 0b0000_0010;

struct VolumeHeader {
    magic: u32,
    /// Next alignment-unit offset to write at. Stored as a u32 on the wire
    /// (spec.md's prose names a u16, but that caps a volume at 512 KiB;
    /// a u32 stays inside the same 4 KiB header budget and actually
    /// supports volumes larger than one block of records — recorded as a
    /// deliberate widening in DESIGN.md).
    offset: u32,
    uuid: [u8; 36],
}

impl VolumeHeader {
    fn fresh(uuid: &str) -> Self {
        let mut uuid_bytes = [0u8; 36];
        let bytes = uuid.as_bytes();
        let n = bytes.len().min(36);
        uuid_bytes[..n].copy_from_slice(&bytes[..n]);
        VolumeHeader {
            magic: STORAGE_MAGIC,
            offset: START_BLOCK_OFFSET as u32,
            uuid: uuid_bytes,
        }
    }

    fn encode(&self) -> [u8; BLOCK_SIZE as usize] {
        let mut buf = [0u8; BLOCK_SIZE as usize];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.offset);
        buf[8..8 + 36].copy_from_slice(&self.uuid);
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        let magic = LittleEndian::read_u32(&buf[0..4]);
        let offset = LittleEndian::read_u32(&buf[4..8]);
        let mut uuid = [0u8; 36];
        uuid.copy_from_slice(&buf[8..8 + 36]);
        VolumeHeader { magic, offset, uuid }
    }

    fn uuid_str(&self) -> String {
        let end = self.uuid.iter().position(|&b| b == 0).unwrap_or(36);
        String::from_utf8_lossy(&self.uuid[..end]).into_owned()
    }
}

const _: () = assert!(HEAD_SIZE <= BLOCK_SIZE as usize);

/// An append-only, block-framed, crash-recoverable volume file.
pub struct StorageVolume {
    path: PathBuf,
    file: File,
    writable: bool,
    header: VolumeHeader,
}

impl StorageVolume {
    /// Open or create the volume at `path`. If the file exists, its
    /// header is validated and the UUID compared; mismatch is fatal. If
    /// absent and `create` is set, a fresh header is written with
    /// `uuid`.
    pub fn open(path: impl AsRef<Path>, create: bool, uuid: &str, writable: bool) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let file = if exists {
            OpenOptions::new().read(true).write(writable).open(&path)?
        } else if create {
            OpenOptions::new().read(true).write(true).create(true).open(&path)?
        } else {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "volume does not exist and create was not requested",
            )));
        };

        let header = if exists {
            let mut buf = [0u8; BLOCK_SIZE as usize];
            let read = file.read_at(&mut buf, 0)?;
            if read < HEAD_SIZE {
                return Err(StorageError::IncompleteBinData {
                    expected: HEAD_SIZE,
                    read,
                });
            }
            let header = VolumeHeader::decode(&buf);
            if header.magic != STORAGE_MAGIC {
                return Err(StorageError::BadHeaderMagicNumber);
            }
            let found = header.uuid_str();
            if found != uuid {
                return Err(StorageError::UuidMismatch {
                    expected: uuid.to_string(),
                    found,
                });
            }
            header
        } else {
            let header = VolumeHeader::fresh(uuid);
            file.write_at(&header.encode(), 0)?;
            header
        };

        Ok(StorageVolume {
            path,
            file,
            writable,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uuid(&self) -> String {
        self.header.uuid_str()
    }

    /// Current write cursor, in alignment units.
    pub fn offset(&self) -> u32 {
        self.header.offset
    }

    /// Append a record. Returns the offset (in alignment units) at which
    /// it was written. Errors with `StorageError::Eof` if the file would
    /// grow past the last-block limit.
    pub fn append(&mut self, data: &[u8], compress: bool) -> StorageResult<u32> {
        if !self.writable {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "volume opened read-only",
            )));
        }

        let (flags, payload) = if compress {
            (FLAG_COMPRESSED, lz4_flex::compress_prepend_size(data))
        } else {
            (0u8, data.to_vec())
        };

        let current_offset = self.header.offset;
        let byte_offset = current_offset as u64 * ALIGNMENT;
        if byte_offset >= LAST_BLOCK_OFFSET {
            return Err(StorageError::Eof);
        }

        let record = encode_record(&payload, flags);
        self.file.write_at(&record, byte_offset)?;

        self.header.offset = current_offset + (record.len() as u64 / ALIGNMENT) as u32;
        Ok(current_offset)
    }

    /// Read the record at `offset` (alignment units). Validates both
    /// framing magic numbers and the payload checksum.
    pub fn read_at(&self, offset: u32) -> StorageResult<Vec<u8>> {
        decode_record(&self.file, offset as u64 * ALIGNMENT)
    }

    /// Mark the record at `offset` deleted in place (sets `FLAG_DELETED`
    /// in its `BinHeader.flags` byte without touching the payload).
    pub fn mark_deleted(&mut self, offset: u32) -> StorageResult<()> {
        let byte_offset = offset as u64 * ALIGNMENT;
        let mut flags_byte = [0u8; 1];
        self.file.read_at(&mut flags_byte, byte_offset + 1)?;
        flags_byte[0] |= FLAG_DELETED;
        self.file.write_at(&flags_byte, byte_offset + 1)?;
        Ok(())
    }

    /// Persist the header block. Callers synchronize disk durability via
    /// the external fsync debouncer (spec.md §4.F) — this only performs
    /// the `pwrite`, never an `fsync` of its own accord.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.write_at(&self.header.encode(), 0)?;
        Ok(())
    }

    pub fn fdatasync(&self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Recovery: detect a torn last record and rewind `header.offset` to
    /// the last valid record boundary, bounded by `scan_from` (the last
    /// known-good offset, normally supplied by the WAL's slot index).
    pub fn recover(&mut self, scan_from: u32) -> StorageResult<()> {
        let mut cursor = scan_from;
        let mut last_good = scan_from;
        loop {
            if cursor as u64 * ALIGNMENT >= self.header.offset as u64 * ALIGNMENT {
                last_good = cursor;
                break;
            }
            let byte_offset = cursor as u64 * ALIGNMENT;
            match decode_record(&self.file, byte_offset).or_else(|e| match e {
                StorageError::NotFound(_) => Ok(Vec::new()),
                other => Err(other),
            }) {
                Ok(_) => {
                    let record_len = record_padded_len(&self.file, byte_offset)?;
                    last_good = cursor + (record_len / ALIGNMENT) as u32;
                    cursor = last_good;
                }
                Err(_) => break,
            }
        }
        self.header.offset = last_good;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_uuid() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    #[test]
    fn round_trip_append_and_read() {
        let dir = tempdir().unwrap();
        let uuid = new_uuid();
        let mut vol = StorageVolume::open(dir.path().join("v.bin"), true, &uuid, true).unwrap();
        let off1 = vol.append(b"hello", false).unwrap();
        let off2 = vol.append(b"world, a bit longer payload", false).unwrap();
        assert_eq!(vol.read_at(off1).unwrap(), b"hello");
        assert_eq!(vol.read_at(off2).unwrap(), b"world, a bit longer payload");
    }

    #[test]
    fn compressed_round_trip() {
        let dir = tempdir().unwrap();
        let uuid = new_uuid();
        let mut vol = StorageVolume::open(dir.path().join("v.bin"), true, &uuid, true).unwrap();
        let payload = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let off = vol.append(&payload, true).unwrap();
        assert_eq!(vol.read_at(off).unwrap(), payload);
    }

    #[test]
    fn reopen_preserves_uuid_and_rejects_mismatch() {
        let dir = tempdir().unwrap();
        let uuid = new_uuid();
        {
            let mut vol = StorageVolume::open(dir.path().join("v.bin"), true, &uuid, true).unwrap();
            vol.append(b"x", false).unwrap();
            vol.flush().unwrap();
        }
        let reopened = StorageVolume::open(dir.path().join("v.bin"), false, &uuid, true);
        assert!(reopened.is_ok());

        let wrong_uuid = new_uuid();
        let mismatch = StorageVolume::open(dir.path().join("v.bin"), false, &wrong_uuid, true);
        assert!(matches!(mismatch, Err(StorageError::UuidMismatch { .. })));
    }

    #[test]
    fn deleted_record_reads_as_not_found() {
        let dir = tempdir().unwrap();
        let uuid = new_uuid();
        let mut vol = StorageVolume::open(dir.path().join("v.bin"), true, &uuid, true).unwrap();
        let off = vol.append(b"gone", false).unwrap();
        vol.mark_deleted(off).unwrap();
        assert!(matches!(vol.read_at(off), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn bad_checksum_is_detected() {
        let dir = tempdir().unwrap();
        let uuid = new_uuid();
        let path = dir.path().join("v.bin");
        let mut vol = StorageVolume::open(&path, true, &uuid, true).unwrap();
        let off = vol.append(b"payload-data", false).unwrap();
        drop(vol);

        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let byte_offset = off as u64 * ALIGNMENT + 6;
        file.write_at(b"X", byte_offset).unwrap();

        let vol = StorageVolume::open(&path, false, &uuid, true).unwrap();
        assert!(matches!(vol.read_at(off), Err(StorageError::BadBinChecksum)));
    }

    #[test]
    fn truncation_recovers_to_prior_record_prefix() {
        let dir = tempdir().unwrap();
        let uuid = new_uuid();
        let path = dir.path().join("v.bin");
        let mut offsets = Vec::new();
        {
            let mut vol = StorageVolume::open(&path, true, &uuid, true).unwrap();
            for i in 0..20u32 {
                let payload = vec![b'a' + (i % 26) as u8; 10 + i as usize];
                offsets.push(vol.append(&payload, false).unwrap());
            }
            vol.flush().unwrap();
        }

        // Truncate the file mid-way through the last record's payload.
        let last_byte = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(last_byte - 3).unwrap();
        drop(file);

        let mut vol = StorageVolume::open(&path, false, &uuid, true).unwrap();
        vol.recover(offsets[0]).unwrap();

        for &off in &offsets[..19] {
            assert!(vol.read_at(off).is_ok());
        }
        assert!(vol.offset() <= offsets[19]);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_any_payload(payload in proptest::collection::vec(proptest::num::u8::ANY, 0..4096)) {
            let dir = tempdir().unwrap();
            let uuid = new_uuid();
            let mut vol = StorageVolume::open(dir.path().join("v.bin"), true, &uuid, true).unwrap();
            let off = vol.append(&payload, false).unwrap();
            proptest::prop_assert_eq!(vol.read_at(off).unwrap(), payload);
        }
    }
}
