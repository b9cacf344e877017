//! Pinned, transaction-aware LRU buffer cache sitting directly on top of
//! [`storage::Pager`].
//!
//! Frames live in a fixed-length `Vec`, never behind raw pointers; LRU
//! order is tracked with `prev`/`next` index fields on each frame, per the
//! engine's "no raw pointers in the cache" design rule. Eviction walks from
//! the LRU tail and skips any frame that is pinned or tagged with an
//! in-flight transaction id, so a transaction's own dirty pages can never
//! be evicted or written back out from under it.


use hashbrown::HashMap;

use common::{DbError, DbResult, TxnId};
use storage::{PageType, Pager, PAGE_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameState {
    Invalid,
    Clean,
    Dirty,
}

struct Frame {
    page_no: Option<u32>,
    page_type: Option<PageType>,
    state: FrameState,
    pin_count: u32,
    txn_id: TxnId,
    buf: Box<[u8; PAGE_SIZE]>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Frame {
    fn empty() -> Self {
        Self {
            page_no: None,
            page_type: None,
            state: FrameState::Invalid,
            pin_count: 0,
            txn_id: 0,
            buf: Box::new([0u8; PAGE_SIZE]),
            prev: None,
            next: None,
        }
    }
}

/// Point-in-time counters mirroring the original cache's `cache_get_stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub dirty: usize,
    pub pinned: usize,
}

/// Optional attachment point for a transaction manager: B+Tree (and any
/// other mutator) reports every page it dirties through this interface
/// instead of owning a reference to the transaction manager directly. The
/// no-op [`NoTxn`] implementation makes "no transaction attached" free.
pub trait DirtyTracker {
    fn note_dirty(&mut self, cache: &mut BufferCache, page_no: u32) -> DbResult<()>;
}

/// The no-op [`DirtyTracker`] used when a mutation happens outside any
/// transaction: the page is dirtied in the cache but untagged, so a plain
/// [`BufferCache::flush`] is free to write it back at any time.
pub struct NoTxn;

impl DirtyTracker for NoTxn {
    fn note_dirty(&mut self, cache: &mut BufferCache, page_no: u32) -> DbResult<()> {
        if let Some(idx) = cache.find_entry(page_no) {
            cache.mark_dirty(idx, 0);
        }
        Ok(())
    }
}

pub struct BufferCache {
    pager: Pager,
    frames: Vec<Frame>,
    index: HashMap<u32, usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
}

impl BufferCache {
    pub fn new(pager: Pager, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer cache needs at least one frame");
        Self {
            pager,
            frames: (0..capacity).map(|_| Frame::empty()).collect(),
            index: HashMap::new(),
            lru_head: None,
            lru_tail: None,
        }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    /// Flush every dirty untagged frame and hand back ownership of the
    /// pager, for a clean shutdown that wants to call [`Pager::close`]
    /// itself. Any frame still tagged with a live transaction is left
    /// dirty; callers should only do this once no transaction is active.
    pub fn into_pager(mut self) -> DbResult<Pager> {
        self.flush()?;
        Ok(self.pager)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            capacity: self.frames.len(),
            ..Default::default()
        };
        for frame in &self.frames {
            if frame.state != FrameState::Invalid {
                stats.resident += 1;
            }
            if frame.state == FrameState::Dirty {
                stats.dirty += 1;
            }
            if frame.pin_count > 0 {
                stats.pinned += 1;
            }
        }
        stats
    }

    /// Bring `page_no` into the cache, returning its frame index. Hits move
    /// the frame to the front of the LRU list; misses evict if necessary.
    pub fn get_page(&mut self, page_no: u32) -> DbResult<usize> {
        if let Some(&idx) = self.index.get(&page_no) {
            self.touch_lru(idx);
            return Ok(idx);
        }

        let idx = self.acquire_frame()?;
        let buf = self.pager.read_page(page_no)?;
        let page_type = storage::page::page_type_of(&buf)?;

        {
            let frame = &mut self.frames[idx];
            *frame.buf = buf;
            frame.page_no = Some(page_no);
            frame.page_type = Some(page_type);
            frame.state = FrameState::Clean;
            frame.pin_count = 0;
            frame.txn_id = 0;
        }
        self.index.insert(page_no, idx);
        self.push_front(idx);
        Ok(idx)
    }

    pub fn frame_bytes(&self, idx: usize) -> &[u8; PAGE_SIZE] {
        &self.frames[idx].buf
    }

    pub fn frame_bytes_mut(&mut self, idx: usize) -> &mut [u8; PAGE_SIZE] {
        &mut self.frames[idx].buf
    }

    pub fn page_no(&self, idx: usize) -> u32 {
        self.frames[idx].page_no.expect("frame is not resident")
    }

    /// Look up the frame index currently holding `page_no`, if resident.
    /// Used by the transaction manager to tag/untag frames by page number.
    pub fn find_entry(&self, page_no: u32) -> Option<usize> {
        self.index.get(&page_no).copied()
    }

    /// Mark a frame dirty and tag it with the mutating transaction. The
    /// checksum is recomputed lazily, at flush/eviction time.
    pub fn mark_dirty(&mut self, idx: usize, txn_id: TxnId) {
        let frame = &mut self.frames[idx];
        frame.state = FrameState::Dirty;
        frame.txn_id = txn_id;
    }

    pub fn mark_clean(&mut self, idx: usize) {
        let frame = &mut self.frames[idx];
        frame.state = FrameState::Clean;
        frame.txn_id = 0;
    }

    pub fn clear_txn(&mut self, idx: usize) {
        self.frames[idx].txn_id = 0;
    }

    pub fn is_dirty(&self, idx: usize) -> bool {
        self.frames[idx].state == FrameState::Dirty
    }

    pub fn txn_id_of(&self, idx: usize) -> TxnId {
        self.frames[idx].txn_id
    }

    pub fn pin(&mut self, idx: usize) {
        self.frames[idx].pin_count += 1;
    }

    pub fn unpin(&mut self, idx: usize) -> DbResult<()> {
        let frame = &mut self.frames[idx];
        if frame.pin_count == 0 {
            return Err(DbError::InvalidArgument(format!(
                "frame {idx} is not pinned"
            )));
        }
        frame.pin_count -= 1;
        Ok(())
    }

    /// Drop a frame's contents without writing it back. Used when an
    /// abort's reload of the on-disk image itself fails.
    pub fn invalidate(&mut self, idx: usize) {
        if let Some(page_no) = self.frames[idx].page_no.take() {
            self.index.remove(&page_no);
        }
        let frame = &mut self.frames[idx];
        frame.state = FrameState::Invalid;
        frame.pin_count = 0;
        frame.txn_id = 0;
    }

    /// Write every clean-to-persist dirty frame back to the pager.
    ///
    /// Transaction isolation rule: a frame tagged with a live transaction
    /// (`txn_id != 0`) is never written here; only the transaction manager
    /// may clear that tag, once the page is safely durable in the WAL.
    pub fn flush(&mut self) -> DbResult<()> {
        for idx in 0..self.frames.len() {
            let (dirty, txn_id) = {
                let frame = &self.frames[idx];
                (frame.state == FrameState::Dirty, frame.txn_id)
            };
            if dirty && txn_id == 0 {
                self.write_back(idx)?;
            }
        }
        Ok(())
    }

    /// Write a single dirty, untagged frame back to its pager home and
    /// mark it clean. Used by the transaction manager's commit path after
    /// the WAL record for the page has been durably flushed.
    pub fn write_back(&mut self, idx: usize) -> DbResult<()> {
        let page_no = self.frames[idx].page_no.expect("frame is not resident");
        let page_type = self.frames[idx].page_type.expect("frame has no page type");
        storage::page::finalize_page(&mut self.frames[idx].buf, page_no, page_type);
        self.pager.write_page_image(page_no, &self.frames[idx].buf)?;
        self.mark_clean(idx);
        Ok(())
    }

    fn acquire_frame(&mut self) -> DbResult<usize> {
        if let Some(idx) = self.frames.iter().position(|f| f.state == FrameState::Invalid) {
            return Ok(idx);
        }
        self.evict_one()
    }

    fn evict_one(&mut self) -> DbResult<usize> {
        let mut cursor = self.lru_tail;
        while let Some(idx) = cursor {
            let (pinned, txn_tagged) = {
                let frame = &self.frames[idx];
                (frame.pin_count > 0, frame.txn_id != 0)
            };
            if !pinned && !txn_tagged {
                if self.frames[idx].state == FrameState::Dirty {
                    self.write_back(idx)?;
                }
                let page_no = self.frames[idx].page_no.take();
                if let Some(page_no) = page_no {
                    self.index.remove(&page_no);
                }
                self.remove_from_lru(idx);
                self.frames[idx].state = FrameState::Invalid;
                return Ok(idx);
            }
            cursor = self.frames[idx].prev;
        }
        Err(DbError::Busy(
            "buffer cache exhausted: every frame is pinned or transaction-tagged".into(),
        ))
    }

    fn touch_lru(&mut self, idx: usize) {
        self.remove_from_lru(idx);
        self.push_front(idx);
    }

    fn remove_from_lru(&mut self, idx: usize) {
        let (prev, next) = (self.frames[idx].prev, self.frames[idx].next);
        match prev {
            Some(p) => self.frames[p].next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.frames[n].prev = prev,
            None => self.lru_tail = prev,
        }
        self.frames[idx].prev = None;
        self.frames[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.frames[idx].prev = None;
        self.frames[idx].next = self.lru_head;
        if let Some(head) = self.lru_head {
            self.frames[head].prev = Some(idx);
        }
        self.lru_head = Some(idx);
        if self.lru_tail.is_none() {
            self.lru_tail = Some(idx);
        }
    }
}
