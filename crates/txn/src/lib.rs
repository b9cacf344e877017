//! Transaction manager: tracks the active transaction's dirty and pinned
//! pages, and coordinates commit (WAL log, flush, eager checkpoint) and
//! abort (cache reload from the on-disk image).

#[cfg(test)]
mod tests;

use buffer::{BufferCache, DirtyTracker};
use common::{DbError, DbResult, TxnId};
use wal::Wal;

/// Dirty-page and pinned-page list capacity per transaction.
pub const MAX_DIRTY_PAGES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    Active,
}

/// Coordinates one in-flight transaction at a time over a [`BufferCache`]
/// and a [`Wal`]. Begin is legal only from `Idle`; commit and abort only
/// from `Active`.
pub struct TransactionManager {
    wal: Wal,
    state: TxnState,
    txn_id: TxnId,
    txn_start_offset: usize,
    dirty_pages: Vec<u32>,
    pinned_pages: Vec<u32>,
}

impl TransactionManager {
    pub fn new(wal: Wal) -> Self {
        Self {
            wal,
            state: TxnState::Idle,
            txn_id: 0,
            txn_start_offset: 0,
            dirty_pages: Vec::new(),
            pinned_pages: Vec::new(),
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn active_txn_id(&self) -> Option<TxnId> {
        (self.state == TxnState::Active).then_some(self.txn_id)
    }

    pub fn is_page_dirty(&self, page_no: u32) -> bool {
        self.dirty_pages.contains(&page_no)
    }

    /// Begin a new transaction. Only legal from `Idle`.
    ///
    /// Marks the file header dirty on the *first* mutation of an opened
    /// writable database (not only on creation): a crash before this
    /// transaction's eager checkpoint must still trigger WAL recovery on
    /// the next open, even if the database was clean on disk until now.
    pub fn begin(&mut self, cache: &mut BufferCache) -> DbResult<TxnId> {
        if self.state != TxnState::Idle {
            return Err(DbError::Busy("a transaction is already active".into()));
        }
        cache.pager_mut().mark_dirty()?;
        let txn_id = self.wal.next_txn_id();
        self.txn_start_offset = self.wal.buffer_len();
        self.wal.write_begin(txn_id)?;
        self.txn_id = txn_id;
        self.dirty_pages.clear();
        self.pinned_pages.clear();
        self.state = TxnState::Active;
        Ok(txn_id)
    }

    /// Record `page_no` as dirtied by the active transaction and tag its
    /// cache frame with the transaction id, so the cache can neither evict
    /// nor flush it out from under the transaction. The caller must have
    /// already pinned the page via `cache.get_page`.
    pub fn add_dirty_page(&mut self, cache: &mut BufferCache, page_no: u32) -> DbResult<()> {
        if self.state != TxnState::Active {
            return Err(DbError::Busy("no active transaction".into()));
        }
        let idx = cache
            .find_entry(page_no)
            .ok_or_else(|| DbError::InvalidArgument(format!("page {page_no} is not cached")))?;
        let already_dirty = self.dirty_pages.contains(&page_no);
        if !already_dirty && self.dirty_pages.len() >= MAX_DIRTY_PAGES {
            return Err(DbError::Full("transaction dirty-page list exhausted".into()));
        }
        cache.mark_dirty(idx, self.txn_id);
        if !already_dirty {
            self.dirty_pages.push(page_no);
        }
        if !self.pinned_pages.contains(&page_no) {
            cache.pin(idx);
            self.pinned_pages.push(page_no);
        }
        Ok(())
    }

    /// Commit the active transaction:
    /// 1. Log a `PAGE` record per dirty page, then `COMMIT`.
    /// 2. Flush the WAL buffer and fsync — the durability point.
    /// 3. Eager checkpoint: write dirty pages to their home location,
    ///    fsync, and clear their cache tags.
    /// 4. Reset the WAL buffer and unpin every page the transaction held.
    pub fn commit(&mut self, cache: &mut BufferCache) -> DbResult<()> {
        if self.state != TxnState::Active {
            return Err(DbError::Busy("no active transaction".into()));
        }

        for &page_no in &self.dirty_pages {
            let idx = cache
                .find_entry(page_no)
                .expect("dirty page must still be resident at commit");
            let image = *cache.frame_bytes(idx);
            self.wal.write_page(self.txn_id, page_no, &image)?;
        }
        self.wal.write_commit(self.txn_id)?;
        self.wal.flush(cache.pager_mut())?;

        // Eager checkpoint: failures here are non-fatal, recovery redoes
        // the WAL's PAGE records on next open.
        for &page_no in &self.dirty_pages {
            if let Some(idx) = cache.find_entry(page_no) {
                let _ = cache.write_back(idx);
                cache.clear_txn(idx);
            }
        }
        let _ = cache.pager_mut().sync();
        let _ = self.wal.reset_buffer(cache.pager_mut());

        for &page_no in &self.pinned_pages {
            if let Some(idx) = cache.find_entry(page_no) {
                let _ = cache.unpin(idx);
            }
        }

        self.finish();
        Ok(())
    }

    /// Abort the active transaction: reload every dirty page's on-disk
    /// image into its cache frame (or invalidate the frame if the reload
    /// itself fails), discard the span of the WAL buffer written since
    /// `begin` (nothing from it was ever flushed), and unpin.
    pub fn abort(&mut self, cache: &mut BufferCache) -> DbResult<()> {
        if self.state != TxnState::Active {
            return Err(DbError::Busy("no active transaction".into()));
        }

        for &page_no in &self.dirty_pages {
            if let Some(idx) = cache.find_entry(page_no) {
                match cache.pager_mut().read_page(page_no) {
                    Ok(image) => {
                        *cache.frame_bytes_mut(idx) = image;
                        cache.mark_clean(idx);
                    }
                    Err(_) => cache.invalidate(idx),
                }
            }
        }
        for &page_no in &self.pinned_pages {
            if let Some(idx) = cache.find_entry(page_no) {
                let _ = cache.unpin(idx);
            }
        }

        self.wal.truncate_buffer(self.txn_start_offset);
        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        self.dirty_pages.clear();
        self.pinned_pages.clear();
        self.txn_id = 0;
        self.state = TxnState::Idle;
    }
}

impl DirtyTracker for TransactionManager {
    fn note_dirty(&mut self, cache: &mut BufferCache, page_no: u32) -> DbResult<()> {
        self.add_dirty_page(cache, page_no)
    }
}
