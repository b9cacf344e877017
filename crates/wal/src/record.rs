//! Fixed 24-byte WAL record header plus the record-type tags spec'd for the
//! on-disk log: `BEGIN`/`PAGE`/`COMMIT`/`ABORT`/`CHECKPOINT`.

use common::le::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use common::{DbError, DbResult, TxnId};
use storage::PAGE_SIZE;

/// Magic stamped into every record header: `"WALR"` read as an LE `u32`.
pub const WAL_MAGIC: u32 = 0x5741_4C52u32.swap_bytes();
pub const RECORD_HEADER_LEN: usize = 24;
/// `page_no(4) + full page image` payload carried by a `PAGE` record.
pub const PAGE_PAYLOAD_LEN: usize = 4 + PAGE_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    Begin = 0,
    Page = 1,
    Commit = 2,
    Abort = 3,
    Checkpoint = 4,
}

impl RecordType {
    pub fn from_u16(v: u16) -> DbResult<Self> {
        Ok(match v {
            0 => RecordType::Begin,
            1 => RecordType::Page,
            2 => RecordType::Commit,
            3 => RecordType::Abort,
            4 => RecordType::Checkpoint,
            other => return Err(DbError::Corruption(format!("unknown WAL record type {other}"))),
        })
    }
}

/// A decoded record header.
pub struct RecordHeader {
    pub record_type: RecordType,
    pub record_size: u32,
    pub txn_id: TxnId,
    pub checksum: u32,
}

/// Append one record (header + payload) to `out`, computing the checksum
/// over the header (with the checksum field zeroed) and the payload.
pub fn append_record(out: &mut Vec<u8>, record_type: RecordType, txn_id: TxnId, payload: &[u8]) {
    let record_size = (RECORD_HEADER_LEN + payload.len()) as u32;
    let start = out.len();
    out.resize(start + RECORD_HEADER_LEN, 0);
    write_u32(&mut out[start..], WAL_MAGIC);
    write_u16(&mut out[start + 4..], record_type as u16);
    write_u16(&mut out[start + 6..], 0);
    write_u32(&mut out[start + 8..], record_size);
    write_u64(&mut out[start + 12..], txn_id);
    write_u32(&mut out[start + 20..], 0);
    out.extend_from_slice(payload);

    let checksum = storage::checksum(&out[start..start + record_size as usize]);
    write_u32(&mut out[start + 20..start + 24], checksum);
}

/// Parse a record header out of `bytes[offset..]`. Fails if the magic is
/// wrong, there aren't enough bytes for a header, or `record_size` would
/// run past `bytes`.
pub fn parse_header(bytes: &[u8], offset: usize) -> DbResult<RecordHeader> {
    if offset + RECORD_HEADER_LEN > bytes.len() {
        return Err(DbError::Corruption("WAL record header truncated".into()));
    }
    let h = &bytes[offset..offset + RECORD_HEADER_LEN];
    let magic = read_u32(h);
    if magic != WAL_MAGIC {
        return Err(DbError::Corruption(format!("bad WAL record magic {magic:#x}")));
    }
    let record_type = RecordType::from_u16(read_u16(&h[4..]))?;
    let record_size = read_u32(&h[8..]);
    let txn_id = read_u64(&h[12..]);
    let checksum = read_u32(&h[20..]);
    if offset + record_size as usize > bytes.len() {
        return Err(DbError::Corruption("WAL record extends past region".into()));
    }
    Ok(RecordHeader {
        record_type,
        record_size,
        txn_id,
        checksum,
    })
}

/// Verify the checksum of the record at `bytes[offset..offset+record_size]`.
pub fn verify_record(bytes: &[u8], offset: usize, header: &RecordHeader) -> bool {
    let end = offset + header.record_size as usize;
    if end > bytes.len() {
        return false;
    }
    let mut scratch = bytes[offset..end].to_vec();
    write_u32(&mut scratch[20..24], 0);
    storage::checksum(&scratch) == header.checksum
}
