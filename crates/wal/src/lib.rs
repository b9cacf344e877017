//! Write-ahead log over the pager's fixed 128 KiB WAL region.
//!
//! The WAL buffers `BEGIN`/`PAGE`/`COMMIT` records in memory and flushes
//! them to the region on commit; the flush's `fsync` is the durability
//! point a transaction commits against. Recovery replays the PAGE records
//! of every committed transaction found in the region back into the data
//! file.

mod record;

#[cfg(test)]
mod tests;

pub use record::{RecordType, WAL_MAGIC};

use std::collections::HashSet;

use common::le::{read_u32, write_u32};
use common::{DbError, DbResult, TxnId};
use storage::{checksum, Pager, PAGE_HEADER_LEN, PAGE_SIZE};

/// Size of the in-memory staging buffer for not-yet-flushed records.
pub const WAL_BUFFER_CAPACITY: usize = 32 * 1024;

/// In-memory WAL state: the staging buffer and the monotonic transaction
/// counter. Durable state (the on-disk region, and the head/tail cursors)
/// lives in the pager's header and the file itself.
pub struct Wal {
    buffer: Vec<u8>,
    next_txn_id: TxnId,
}

impl Wal {
    /// Zero-initialize a WAL over a freshly opened pager.
    pub fn create() -> Self {
        Self {
            buffer: Vec::new(),
            next_txn_id: 0,
        }
    }

    /// Pre-increment the transaction counter and return the new id.
    pub fn next_txn_id(&mut self) -> TxnId {
        self.next_txn_id += 1;
        self.next_txn_id
    }

    /// Current length of the staging buffer, used by the transaction
    /// manager to snapshot a rollback point at `begin`.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard everything appended since `len` (an abort: nothing durable
    /// was written yet for the discarded record span).
    pub fn truncate_buffer(&mut self, len: usize) {
        self.buffer.truncate(len);
    }

    fn write_record(&mut self, record_type: RecordType, txn_id: TxnId, payload: &[u8]) -> DbResult<()> {
        let needed = record::RECORD_HEADER_LEN + payload.len();
        if self.buffer.len() + needed > WAL_BUFFER_CAPACITY {
            return Err(DbError::Full("WAL buffer exhausted".into()));
        }
        record::append_record(&mut self.buffer, record_type, txn_id, payload);
        Ok(())
    }

    pub fn write_begin(&mut self, txn_id: TxnId) -> DbResult<()> {
        self.write_record(RecordType::Begin, txn_id, &[])
    }

    /// Log `image` under `page_no`. A page mutated in the cache has its
    /// header checksum refreshed only at eager-checkpoint time, so the
    /// frame bytes captured here may carry a stale checksum; recompute it
    /// before logging so that replaying this record during recovery writes
    /// a page whose stored checksum matches its body.
    pub fn write_page(&mut self, txn_id: TxnId, page_no: u32, image: &[u8; PAGE_SIZE]) -> DbResult<()> {
        let mut image = *image;
        let sum = checksum(&image[PAGE_HEADER_LEN..]);
        write_u32(&mut image[8..12], sum);

        let mut payload = Vec::with_capacity(record::PAGE_PAYLOAD_LEN);
        payload.extend_from_slice(&page_no.to_le_bytes());
        payload.extend_from_slice(&image);
        self.write_record(RecordType::Page, txn_id, &payload)
    }

    pub fn write_commit(&mut self, txn_id: TxnId) -> DbResult<()> {
        self.write_record(RecordType::Commit, txn_id, &[])
    }

    /// Write the staging buffer to the region at the pager's current
    /// `wal_head`, fsync, and advance `wal_head` by the bytes written.
    /// This is the transaction's durability point.
    pub fn flush(&mut self, pager: &mut Pager) -> DbResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let head = pager.wal_head() as u64;
        let used = self.buffer.len() as u64;
        if head + used > storage::WAL_REGION_BYTE_LEN {
            return Err(DbError::Full("WAL region exhausted".into()));
        }
        pager.write_wal_region(head, &self.buffer)?;
        pager.sync()?;
        pager.set_wal_cursors((head + used) as u32, pager.wal_tail())?;
        self.buffer.clear();
        Ok(())
    }

    /// Reset cursors and the staging buffer after a successful eager
    /// checkpoint. Only called once the checkpoint's writes are durable.
    pub fn reset_buffer(&mut self, pager: &mut Pager) -> DbResult<()> {
        self.buffer.clear();
        pager.set_wal_cursors(0, 0)
    }

    /// Recover a database whose header carries the dirty flag: scan the
    /// WAL region for committed transactions (pass 1) and replay their
    /// PAGE records into the data file (pass 2).
    pub fn recover(pager: &mut Pager) -> DbResult<()> {
        let region = pager.read_wal_region()?;
        let limit = (pager.wal_head() as usize).min(region.len());

        let mut committed: HashSet<TxnId> = HashSet::new();
        let mut offset = 0;
        while offset < limit {
            let header = match record::parse_header(&region, offset) {
                Ok(h) => h,
                Err(_) => break,
            };
            if !record::verify_record(&region, offset, &header) {
                break;
            }
            if header.record_type == RecordType::Commit {
                committed.insert(header.txn_id);
            }
            offset += header.record_size as usize;
        }

        let mut offset = 0;
        while offset < limit {
            let header = match record::parse_header(&region, offset) {
                Ok(h) => h,
                Err(_) => break,
            };
            if !record::verify_record(&region, offset, &header) {
                break;
            }
            if header.record_type == RecordType::Page && committed.contains(&header.txn_id) {
                let payload_start = offset + record::RECORD_HEADER_LEN;
                let page_no = read_u32(&region[payload_start..]);
                let image_start = payload_start + 4;
                let mut image = [0u8; PAGE_SIZE];
                image.copy_from_slice(&region[image_start..image_start + PAGE_SIZE]);
                pager.write_page_image(page_no, &image)?;
            }
            offset += header.record_size as usize;
        }

        pager.sync()?;
        pager.clear_dirty()
    }
}
