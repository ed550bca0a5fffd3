//! Write-Ahead Log: a slotted, versioned log keyed by database revision
//! (spec.md §4.C).
//!
//! A WAL file is a specialized Storage Volume whose header trades the
//! plain volume's ASCII UUID + no-index layout for a 16-byte UUID, a
//! starting revision, and a fixed slot index mapping
//! `revision - header.revision` to a byte offset. Record framing itself
//! (`record.rs`) is shared with the plain volume.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{StorageError, StorageResult};
use crate::record::{decode_record, encode_record};
use crate::volume::{ALIGNMENT, BLOCK_SIZE, START_BLOCK_OFFSET};

const HEAD_FIXED_SIZE: usize = 4 /* offset */ + 8 /* revision */ + 16 /* uuid */;
/// `WAL_SLOTS = (block_size - sizeof(head)) / sizeof(u32)` (spec.md §3).
pub const WAL_SLOTS: usize = (BLOCK_SIZE as usize - HEAD_FIXED_SIZE) / 4;

const _: () = assert!(HEAD_FIXED_SIZE + WAL_SLOTS * 4 <= BLOCK_SIZE as usize);

/// One WAL line kind, per the decoding table in spec.md §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalLine {
    AddDocument { doc: Vec<u8> },
    DeleteDocumentTerm { term: String },
    Commit { revision: u64 },
    ReplaceDocument { docid: u32, doc: Vec<u8> },
    ReplaceDocumentTerm { term: String, doc: Vec<u8> },
    DeleteDocument { docid: u32 },
    SetMetadata { key: String, value: Vec<u8> },
    AddSpelling { word: String, freq: u32 },
    RemoveSpelling { word: String, freq: u32 },
}

impl WalLine {
    fn kind(&self) -> u8 {
        match self {
            WalLine::AddDocument { .. } => 0,
            WalLine::DeleteDocumentTerm { .. } => 1,
            WalLine::Commit { .. } => 2,
            WalLine::ReplaceDocument { .. } => 3,
            WalLine::ReplaceDocumentTerm { .. } => 4,
            WalLine::DeleteDocument { .. } => 5,
            WalLine::SetMetadata { .. } => 6,
            WalLine::AddSpelling { .. } => 7,
            WalLine::RemoveSpelling { .. } => 8,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = vec![self.kind()];
        match self {
            WalLine::AddDocument { doc } => body.extend_from_slice(doc),
            WalLine::DeleteDocumentTerm { term } => write_str(&mut body, term),
            WalLine::Commit { revision } => write_u64(&mut body, *revision),
            WalLine::ReplaceDocument { docid, doc } => {
                write_u32(&mut body, *docid);
                body.extend_from_slice(doc);
            }
            WalLine::ReplaceDocumentTerm { term, doc } => {
                write_str(&mut body, term);
                body.extend_from_slice(doc);
            }
            WalLine::DeleteDocument { docid } => write_u32(&mut body, *docid),
            WalLine::SetMetadata { key, value } => {
                write_str(&mut body, key);
                write_bytes(&mut body, value);
            }
            WalLine::AddSpelling { word, freq } => {
                write_str(&mut body, word);
                write_u32(&mut body, *freq);
            }
            WalLine::RemoveSpelling { word, freq } => {
                write_str(&mut body, word);
                write_u32(&mut body, *freq);
            }
        }
        body
    }

    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.is_empty() {
            return Err(StorageError::CorruptVolume("empty WAL line".into()));
        }
        let kind = bytes[0];
        let rest = &bytes[1..];
        Ok(match kind {
            0 => WalLine::AddDocument { doc: rest.to_vec() },
            1 => WalLine::DeleteDocumentTerm {
                term: read_str(rest)?.0,
            },
            2 => WalLine::Commit {
                revision: read_u64(rest)?,
            },
            3 => {
                let (docid, tail) = read_u32_prefix(rest)?;
                WalLine::ReplaceDocument {
                    docid,
                    doc: tail.to_vec(),
                }
            }
            4 => {
                let (term, tail) = read_str(rest)?;
                WalLine::ReplaceDocumentTerm {
                    term,
                    doc: tail.to_vec(),
                }
            }
            5 => WalLine::DeleteDocument {
                docid: read_u32(rest)?,
            },
            6 => {
                let (key, tail) = read_str(rest)?;
                let (value, _) = read_bytes(tail)?;
                WalLine::SetMetadata { key, value }
            }
            7 => {
                let (word, tail) = read_str(rest)?;
                WalLine::AddSpelling {
                    word,
                    freq: read_u32(tail)?,
                }
            }
            8 => {
                let (word, tail) = read_str(rest)?;
                WalLine::RemoveSpelling {
                    word,
                    freq: read_u32(tail)?,
                }
            }
            other => return Err(StorageError::CorruptVolume(format!("unknown WAL line kind {other}"))),
        })
    }

    /// Apply this line against a live `IndexBackend` (spec.md §4.C
    /// "Replay"). `Commit` is a no-op here — replay re-derives state by
    /// re-running the mutations a revision contained, not by bumping the
    /// backend's own revision counter a second time (spec property 6,
    /// "WAL idempotence": replaying `[r..r+n]` twice must match replaying
    /// it once, which a second `commit()` call would violate). Spelling
    /// lines have no counterpart in the `IndexBackend` contract (spec.md
    /// §6 doesn't name one) so they're accepted but otherwise ignored.
    pub fn apply(&self, backend: &mut dyn xapiand_core::backend::IndexBackend) -> StorageResult<()> {
        use xapiand_core::backend::BackendError;
        let to_storage = |e: BackendError| StorageError::Backend(e.to_string());
        match self {
            WalLine::AddDocument { doc } => {
                backend.add_document(doc).map_err(to_storage)?;
            }
            WalLine::DeleteDocumentTerm { term } => {
                backend.delete_document_term(term).map_err(to_storage)?;
            }
            WalLine::Commit { .. } => {}
            WalLine::ReplaceDocument { docid, doc } => {
                backend.replace_document(*docid as u64, doc).map_err(to_storage)?;
            }
            WalLine::ReplaceDocumentTerm { term, doc } => {
                backend.replace_document_term(term, doc).map_err(to_storage)?;
            }
            WalLine::DeleteDocument { docid } => {
                backend.delete_document(*docid as u64).map_err(to_storage)?;
            }
            WalLine::SetMetadata { key, value } => {
                backend.set_metadata(key, value, false).map_err(to_storage)?;
            }
            WalLine::AddSpelling { .. } | WalLine::RemoveSpelling { .. } => {}
        }
        Ok(())
    }
}

/// Replay every WAL line whose revision falls in `from_revision..=to_revision`
/// against `backend`, selecting files from `wal_set` as needed (spec.md
/// §4.C "Replay"). Unknown line kinds already fail during `WalLine::decode`
/// (surfaced here as `CorruptVolume`); if `validate_uuid` is set, a UUID
/// mismatch on any selected file aborts the whole replay.
pub fn replay(
    wal_set: &WalSet,
    from_revision: u64,
    to_revision: u64,
    validate_uuid: bool,
    backend: &mut dyn xapiand_core::backend::IndexBackend,
) -> StorageResult<()> {
    let mut revision = from_revision;
    while revision <= to_revision {
        let Some(wal) = wal_set.reader_for(revision, validate_uuid)? else {
            return Err(StorageError::CorruptVolume(format!(
                "no WAL file covers revision {revision}"
            )));
        };
        let before = revision;
        for item in wal.iter_from(revision) {
            let (line_revision, bytes) = item?;
            if line_revision > to_revision {
                return Ok(());
            }
            let line = WalLine::decode(&bytes)?;
            line.apply(backend)?;
            revision = line_revision + 1;
        }
        if revision == before {
            return Err(StorageError::CorruptVolume(format!(
                "WAL gap: no record for revision {revision}"
            )));
        }
    }
    Ok(())
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, v);
    out.extend_from_slice(&buf);
}
fn write_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, v);
    out.extend_from_slice(&buf);
}
fn write_bytes(out: &mut Vec<u8>, v: &[u8]) {
    write_u32(out, v.len() as u32);
    out.extend_from_slice(v);
}
fn write_str(out: &mut Vec<u8>, s: &str) {
    write_bytes(out, s.as_bytes());
}
fn read_u32(bytes: &[u8]) -> StorageResult<u32> {
    if bytes.len() < 4 {
        return Err(StorageError::CorruptVolume("truncated u32 in WAL line".into()));
    }
    Ok(LittleEndian::read_u32(&bytes[..4]))
}
fn read_u64(bytes: &[u8]) -> StorageResult<u64> {
    if bytes.len() < 8 {
        return Err(StorageError::CorruptVolume("truncated u64 in WAL line".into()));
    }
    Ok(LittleEndian::read_u64(&bytes[..8]))
}
fn read_u32_prefix(bytes: &[u8]) -> StorageResult<(u32, &[u8])> {
    let v = read_u32(bytes)?;
    Ok((v, &bytes[4..]))
}
fn read_bytes(bytes: &[u8]) -> StorageResult<(Vec<u8>, &[u8])> {
    let len = read_u32(bytes)? as usize;
    if bytes.len() < 4 + len {
        return Err(StorageError::CorruptVolume("truncated bytes in WAL line".into()));
    }
    Ok((bytes[4..4 + len].to_vec(), &bytes[4 + len..]))
}
fn read_str(bytes: &[u8]) -> StorageResult<(String, &[u8])> {
    let (raw, tail) = read_bytes(bytes)?;
    let s = String::from_utf8(raw).map_err(|e| StorageError::CorruptVolume(e.to_string()))?;
    Ok((s, tail))
}

struct WalHeader {
    offset: u32,
    revision: u64,
    uuid: [u8; 16],
    slot: Vec<u32>,
}

impl WalHeader {
    fn fresh(uuid: [u8; 16], revision: u64) -> Self {
        WalHeader {
            offset: START_BLOCK_OFFSET as u32,
            revision,
            uuid,
            slot: vec![0; WAL_SLOTS],
        }
    }

    fn encode(&self) -> [u8; BLOCK_SIZE as usize] {
        let mut buf = [0u8; BLOCK_SIZE as usize];
        LittleEndian::write_u32(&mut buf[0..4], self.offset);
        LittleEndian::write_u64(&mut buf[4..12], self.revision);
        buf[12..28].copy_from_slice(&self.uuid);
        for (i, slot) in self.slot.iter().enumerate() {
            let start = HEAD_FIXED_SIZE + i * 4;
            LittleEndian::write_u32(&mut buf[start..start + 4], *slot);
        }
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        let offset = LittleEndian::read_u32(&buf[0..4]);
        let revision = LittleEndian::read_u64(&buf[4..12]);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[12..28]);
        let mut slot = vec![0u32; WAL_SLOTS];
        for (i, s) in slot.iter_mut().enumerate() {
            let start = HEAD_FIXED_SIZE + i * 4;
            *s = LittleEndian::read_u32(&buf[start..start + 4]);
        }
        WalHeader {
            offset,
            revision,
            uuid,
            slot,
        }
    }

    /// Highest slot index with a nonzero (written) offset, or `None` if
    /// the file has no records yet.
    fn highest_valid_slot(&self) -> Option<usize> {
        self.slot.iter().rposition(|&o| o != 0)
    }
}

/// A single WAL file covering revisions `[header.revision, header.revision + WAL_SLOTS)`.
pub struct Wal {
    path: PathBuf,
    file: File,
    header: WalHeader,
}

impl Wal {
    pub fn create(path: impl AsRef<Path>, uuid: [u8; 16], start_revision: u64) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let header = WalHeader::fresh(uuid, start_revision);
        file.write_at(&header.encode(), 0)?;
        Ok(Wal { path, file, header })
    }

    pub fn open(path: impl AsRef<Path>, uuid: [u8; 16], validate_uuid: bool, writable: bool) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;
        let mut buf = [0u8; BLOCK_SIZE as usize];
        let read = file.read_at(&mut buf, 0)?;
        if read < HEAD_FIXED_SIZE {
            return Err(StorageError::IncompleteBinData {
                expected: HEAD_FIXED_SIZE,
                read,
            });
        }
        let header = WalHeader::decode(&buf);
        if validate_uuid && header.uuid != uuid {
            return Err(StorageError::UuidMismatch {
                expected: hex(&uuid),
                found: hex(&header.uuid),
            });
        }
        Ok(Wal { path, file, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_revision(&self) -> u64 {
        self.header.revision
    }

    /// Exclusive upper bound on revisions this file can still answer for
    /// a `find`, based on the highest written slot.
    pub fn revision_upper_bound(&self) -> u64 {
        match self.header.highest_valid_slot() {
            Some(idx) => self.header.revision + idx as u64 + 1,
            None => self.header.revision,
        }
    }

    pub fn is_full(&self) -> bool {
        self.header.highest_valid_slot() == Some(WAL_SLOTS - 1)
    }

    fn slot_index(&self, revision: u64) -> Option<usize> {
        let idx = revision.checked_sub(self.header.revision)?;
        if idx as usize >= WAL_SLOTS {
            None
        } else {
            Some(idx as usize)
        }
    }

    /// Append `line` tagged for `revision`. `slot[revision - header.revision]`
    /// is updated to the new record's offset, then the header is flushed.
    pub fn write_line(&mut self, revision: u64, line: &WalLine) -> StorageResult<u32> {
        let slot_idx = self
            .slot_index(revision)
            .ok_or_else(|| StorageError::CorruptVolume(format!("revision {revision} out of slot range")))?;

        let payload = line.encode();
        let byte_offset = self.header.offset as u64 * ALIGNMENT;
        let record = encode_record(&payload, 0);
        self.file.write_at(&record, byte_offset)?;
        let record_offset = self.header.offset;
        self.header.offset += (record.len() as u64 / ALIGNMENT) as u32;
        self.header.slot[slot_idx] = record_offset;
        self.flush()?;
        Ok(record_offset)
    }

    pub fn flush(&mut self) -> StorageResult<()> {
        self.file.write_at(&self.header.encode(), 0)?;
        Ok(())
    }

    pub fn fdatasync(&self) -> StorageResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Look up the byte offset (alignment units) for `revision`, or
    /// `None` if it falls outside this file's written slots.
    pub fn find(&self, revision: u64) -> Option<u32> {
        let idx = self.slot_index(revision)?;
        let offset = self.header.slot[idx];
        if offset == 0 {
            None
        } else {
            Some(offset)
        }
    }

    /// Iterate `(revision, line_bytes)` starting at `from_revision`
    /// (inclusive) through the last written slot in this file.
    pub fn iter_from(&self, from_revision: u64) -> WalIter<'_> {
        let start_idx = from_revision.saturating_sub(self.header.revision) as usize;
        WalIter {
            wal: self,
            next_idx: start_idx,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct WalIter<'a> {
    wal: &'a Wal,
    next_idx: usize,
}

impl<'a> Iterator for WalIter<'a> {
    type Item = StorageResult<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_idx >= WAL_SLOTS {
            return None;
        }
        let offset = self.wal.header.slot[self.next_idx];
        if offset == 0 {
            return None;
        }
        let revision = self.wal.header.revision + self.next_idx as u64;
        self.next_idx += 1;
        let byte_offset = offset as u64 * ALIGNMENT;
        Some(decode_record(&self.wal.file, byte_offset).map(|line| (revision, line)))
    }
}

/// A directory of rotating WAL files, one per revision-slot-range
/// (spec.md §4.C "Rotation").
pub struct WalSet {
    dir: PathBuf,
    uuid: [u8; 16],
}

impl WalSet {
    pub fn new(dir: impl AsRef<Path>, uuid: [u8; 16]) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(WalSet { dir, uuid })
    }

    fn file_name(start_revision: u64) -> String {
        format!("wal.{start_revision:020}")
    }

    fn existing_start_revisions(&self) -> io::Result<Vec<u64>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(rev_str) = name.strip_prefix("wal.") {
                    if let Ok(rev) = rev_str.parse::<u64>() {
                        out.push(rev);
                    }
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Open (creating if needed) the WAL file that should receive
    /// `revision`, rotating to a new file when the current one is full.
    pub fn writer_for(&self, revision: u64) -> StorageResult<Wal> {
        let starts = self.existing_start_revisions()?;
        if let Some(&last_start) = starts.last() {
            let path = self.dir.join(Self::file_name(last_start));
            let wal = Wal::open(&path, self.uuid, true, true)?;
            if !wal.is_full() && revision >= wal.start_revision() {
                return Ok(wal);
            }
        }
        Wal::create(self.dir.join(Self::file_name(revision)), self.uuid, revision)
    }

    /// Select the WAL file whose `header.revision <= revision <
    /// header.revision + highest_valid_slot()` (spec.md §4.C "Replay").
    /// Two files claiming overlapping revision ranges is `CorruptVolume`
    /// (spec.md §9 Open Questions: treated as corruption pending upstream
    /// confirmation).
    pub fn reader_for(&self, revision: u64, validate_uuid: bool) -> StorageResult<Option<Wal>> {
        let starts = self.existing_start_revisions()?;
        let mut candidate: Option<u64> = None;
        for &start in &starts {
            if start <= revision {
                if let Some(prev) = candidate {
                    let prev_wal = Wal::open(self.dir.join(Self::file_name(prev)), self.uuid, validate_uuid, false)?;
                    if revision < prev_wal.revision_upper_bound() && start <= prev_wal.revision_upper_bound() {
                        return Err(StorageError::CorruptVolume(format!(
                            "overlapping WAL revision ranges at start {start} and {prev}"
                        )));
                    }
                }
                candidate = Some(start);
            }
        }
        let Some(start) = candidate else { return Ok(None) };
        let wal = Wal::open(self.dir.join(Self::file_name(start)), self.uuid, validate_uuid, false)?;
        if revision < wal.revision_upper_bound() {
            Ok(Some(wal))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_and_find_round_trip() {
        let dir = tempdir().unwrap();
        let uuid = [7u8; 16];
        let mut wal = Wal::create(dir.path().join("wal.0"), uuid, 0).unwrap();
        wal.write_line(0, &WalLine::AddDocument { doc: b"doc-a".to_vec() }).unwrap();
        wal.write_line(1, &WalLine::Commit { revision: 1 }).unwrap();
        assert!(wal.find(0).is_some());
        assert!(wal.find(1).is_some());
        assert!(wal.find(2).is_none());
    }

    #[test]
    fn iteration_yields_revisions_in_order() {
        let dir = tempdir().unwrap();
        let uuid = [1u8; 16];
        let mut wal = Wal::create(dir.path().join("wal.0"), uuid, 0).unwrap();
        for i in 0..5u64 {
            wal.write_line(i, &WalLine::DeleteDocument { docid: i as u32 }).unwrap();
        }
        let items: Vec<_> = wal.iter_from(0).map(|r| r.unwrap().0).collect();
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn line_encode_decode_round_trip_each_kind() {
        let lines = vec![
            WalLine::AddDocument { doc: b"x".to_vec() },
            WalLine::DeleteDocumentTerm { term: "Qfoo".into() },
            WalLine::Commit { revision: 42 },
            WalLine::ReplaceDocument { docid: 3, doc: b"y".to_vec() },
            WalLine::ReplaceDocumentTerm { term: "Qbar".into(), doc: b"z".to_vec() },
            WalLine::DeleteDocument { docid: 9 },
            WalLine::SetMetadata { key: "_schema".into(), value: b"v1".to_vec() },
            WalLine::AddSpelling { word: "hello".into(), freq: 1 },
            WalLine::RemoveSpelling { word: "hello".into(), freq: 1 },
        ];
        for line in lines {
            let encoded = line.encode();
            let decoded = WalLine::decode(&encoded).unwrap();
            assert_eq!(line, decoded);
        }
    }

    #[test]
    fn wal_set_rotates_when_full() {
        let dir = tempdir().unwrap();
        let uuid = [2u8; 16];
        let set = WalSet::new(dir.path(), uuid).unwrap();
        let mut wal = set.writer_for(0).unwrap();
        for i in 0..WAL_SLOTS as u64 {
            wal.write_line(i, &WalLine::Commit { revision: i }).unwrap();
        }
        assert!(wal.is_full());
        let next = set.writer_for(WAL_SLOTS as u64).unwrap();
        assert_eq!(next.start_revision(), WAL_SLOTS as u64);
    }

    #[test]
    fn wal_set_reader_selects_correct_file() {
        let dir = tempdir().unwrap();
        let uuid = [3u8; 16];
        let set = WalSet::new(dir.path(), uuid).unwrap();
        {
            let mut wal = set.writer_for(0).unwrap();
            for i in 0..5u64 {
                wal.write_line(i, &WalLine::Commit { revision: i }).unwrap();
            }
        }
        let found = set.reader_for(3, true).unwrap().expect("file must be found");
        assert_eq!(found.start_revision(), 0);
        assert!(set.reader_for(100, true).unwrap().is_none());
    }

    #[test]
    fn replay_applies_lines_in_order_against_a_backend() {
        use xapiand_core::backend::{IndexBackend, MemoryBackend};

        let dir = tempdir().unwrap();
        let uuid = [9u8; 16];
        let set = WalSet::new(dir.path(), uuid).unwrap();
        {
            let mut wal = set.writer_for(0).unwrap();
            wal.write_line(0, &WalLine::AddDocument { doc: b"doc-a".to_vec() }).unwrap();
            wal.write_line(1, &WalLine::AddDocument { doc: b"doc-b".to_vec() }).unwrap();
            wal.write_line(2, &WalLine::DeleteDocument { docid: 1 }).unwrap();
            wal.write_line(3, &WalLine::Commit { revision: 1 }).unwrap();
        }

        let mut backend = MemoryBackend::new(uuid);
        replay(&set, 0, 3, true, &mut backend).unwrap();

        assert_eq!(backend.get_document(1).unwrap(), None);
        assert_eq!(backend.get_document(2).unwrap(), Some(b"doc-b".to_vec()));
    }

    #[test]
    fn replaying_twice_is_idempotent() {
        use xapiand_core::backend::{IndexBackend, MemoryBackend};

        let dir = tempdir().unwrap();
        let uuid = [10u8; 16];
        let set = WalSet::new(dir.path(), uuid).unwrap();
        {
            let mut wal = set.writer_for(0).unwrap();
            wal.write_line(0, &WalLine::ReplaceDocument { docid: 5, doc: b"v1".to_vec() }).unwrap();
            wal.write_line(1, &WalLine::SetMetadata { key: "_schema".into(), value: b"s1".to_vec() })
                .unwrap();
        }

        let mut once = MemoryBackend::new(uuid);
        replay(&set, 0, 1, true, &mut once).unwrap();

        let mut twice = MemoryBackend::new(uuid);
        replay(&set, 0, 1, true, &mut twice).unwrap();
        replay(&set, 0, 1, true, &mut twice).unwrap();

        assert_eq!(once.get_document(5).unwrap(), twice.get_document(5).unwrap());
        assert_eq!(once.get_metadata("_schema").unwrap(), twice.get_metadata("_schema").unwrap());
    }

    #[test]
    fn replay_rejects_a_gap_in_the_slot_range() {
        use xapiand_core::backend::MemoryBackend;

        let dir = tempdir().unwrap();
        let uuid = [11u8; 16];
        let set = WalSet::new(dir.path(), uuid).unwrap();
        {
            let mut wal = set.writer_for(0).unwrap();
            wal.write_line(0, &WalLine::Commit { revision: 1 }).unwrap();
            // revision 1 is deliberately left unwritten, leaving a gap
            // before revision 2's record.
            wal.write_line(2, &WalLine::Commit { revision: 3 }).unwrap();
        }

        let mut backend = MemoryBackend::new(uuid);
        let err = replay(&set, 0, 2, true, &mut backend).unwrap_err();
        assert!(matches!(err, StorageError::CorruptVolume(_)));
    }
}
