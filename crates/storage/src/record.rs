//! Shared record framing used by both the plain Storage Volume and the
//! WAL (which differs only in its header layout, per spec.md §4.C).

use std::fs::File;
use std::os::unix::fs::FileExt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{StorageError, StorageResult};
use crate::volume::{ALIGNMENT, BIN_FOOTER_MAGIC, BIN_HEADER_MAGIC, FLAG_COMPRESSED, FLAG_DELETED};

pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

/// Encode `payload` (already compressed if needed) into a padded,
/// framed record: `BinHeader{magic,flags,size} . payload . BinFooter{checksum,magic}`.
pub fn encode_record(payload: &[u8], flags: u8) -> Vec<u8> {
    let mut record = Vec::with_capacity(6 + payload.len() + 5);
    record.push(BIN_HEADER_MAGIC);
    record.push(flags);
    let mut size_buf = [0u8; 4];
    LittleEndian::write_u32(&mut size_buf, payload.len() as u32);
    record.extend_from_slice(&size_buf);
    record.extend_from_slice(payload);
    let checksum = crc32fast::hash(payload);
    let mut checksum_buf = [0u8; 4];
    LittleEndian::write_u32(&mut checksum_buf, checksum);
    record.extend_from_slice(&checksum_buf);
    record.push(BIN_FOOTER_MAGIC);

    let padded_len = align_up(record.len() as u64, ALIGNMENT);
    record.resize(padded_len as usize, 0);
    record
}

/// Decode the (possibly still-compressed) raw payload bytes at
/// `byte_offset`, validating framing and checksum. Returns
/// `(flags, raw_payload)`; the caller decompresses if `FLAG_COMPRESSED`.
pub fn decode_record_raw(file: &File, byte_offset: u64) -> StorageResult<(u8, Vec<u8>)> {
    let mut bin_header = [0u8; 6];
    let read = file.read_at(&mut bin_header, byte_offset)?;
    if read != bin_header.len() {
        return Err(StorageError::IncompleteBinData {
            expected: bin_header.len(),
            read,
        });
    }
    if bin_header[0] != BIN_HEADER_MAGIC {
        return Err(StorageError::BadBinHeaderMagicNumber);
    }
    let flags = bin_header[1];
    let size = LittleEndian::read_u32(&bin_header[2..6]) as usize;

    if flags & FLAG_DELETED != 0 {
        return Err(StorageError::NotFound((byte_offset / ALIGNMENT) as u32));
    }

    let mut payload = vec![0u8; size];
    let read = file.read_at(&mut payload, byte_offset + 6)?;
    if read != size {
        return Err(StorageError::IncompleteBinData { expected: size, read });
    }

    let mut bin_footer = [0u8; 5];
    let read = file.read_at(&mut bin_footer, byte_offset + 6 + size as u64)?;
    if read != bin_footer.len() {
        return Err(StorageError::IncompleteBinData {
            expected: bin_footer.len(),
            read,
        });
    }
    let checksum = LittleEndian::read_u32(&bin_footer[0..4]);
    if bin_footer[4] != BIN_FOOTER_MAGIC {
        return Err(StorageError::BadBinFooterMagicNumber);
    }
    if crc32fast::hash(&payload) != checksum {
        return Err(StorageError::BadBinChecksum);
    }

    Ok((flags, payload))
}

pub fn decode_record(file: &File, byte_offset: u64) -> StorageResult<Vec<u8>> {
    let (flags, payload) = decode_record_raw(file, byte_offset)?;
    if flags & FLAG_COMPRESSED != 0 {
        lz4_flex::decompress_size_prepended(&payload).map_err(|e| StorageError::CorruptVolume(e.to_string()))
    } else {
        Ok(payload)
    }
}

/// Length (in bytes, padded to `ALIGNMENT`) of the record whose size
/// field lives at `byte_offset + 2`. Used to walk past a record without
/// fully decoding it (recovery scans, deleted records).
pub fn record_padded_len(file: &File, byte_offset: u64) -> StorageResult<u64> {
    let mut size_buf = [0u8; 4];
    file.read_at(&mut size_buf, byte_offset + 2)?;
    let size = LittleEndian::read_u32(&size_buf) as u64;
    Ok(align_up(6 + size + 5, ALIGNMENT))
}
