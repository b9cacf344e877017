use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use common::{DbError, DbResult};

use crate::header::{Bitmap, FileHeader, BITMAP_LEN, BITMAP_OFFSET, FLAG_DIRTY, HEADER_PREFIX_LEN};
use crate::page::{self, PageType, PAGE_SIZE};

/// First page number reserved for the fixed write-ahead-log region.
pub const WAL_REGION_START_PAGE: u32 = 3;
/// Number of pages the write-ahead-log region occupies (128 KiB).
pub const WAL_REGION_PAGE_COUNT: u32 = 32;
/// Total pages reserved before B+Tree/catalog pages may be allocated:
/// page 0 (header+bitmap), pages 1-2 (reserved), pages 3-34 (WAL region).
pub const RESERVED_PAGE_COUNT: u32 = WAL_REGION_START_PAGE + WAL_REGION_PAGE_COUNT;

pub const WAL_REGION_BYTE_OFFSET: u64 = WAL_REGION_START_PAGE as u64 * PAGE_SIZE as u64;
pub const WAL_REGION_BYTE_LEN: u64 = WAL_REGION_PAGE_COUNT as u64 * PAGE_SIZE as u64;

/// Manages a single fixed-page-size database file: the header/bitmap page,
/// the reserved WAL region, and page allocation for everything else
/// (B+Tree nodes, overflow pages, catalog pages).
///
/// One `Pager` owns one open `File`; the buffer cache sits on top of it and
/// the transaction manager drives its WAL-region and dirty-flag methods.
pub struct Pager {
    file: File,
    header: FileHeader,
}

impl Pager {
    /// Create a brand new database file at `path`. Fails if the file
    /// already exists.
    pub fn create(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let header = FileHeader::new(
            PAGE_SIZE as u32,
            RESERVED_PAGE_COUNT,
            WAL_REGION_BYTE_OFFSET as u32,
        );

        let mut pager = Self { file, header };
        pager.file.set_len(RESERVED_PAGE_COUNT as u64 * PAGE_SIZE as u64)?;
        pager.write_header_page()?;

        {
            let mut buf = [0u8; PAGE_SIZE];
            pager.read_raw_page(0, &mut buf)?;
            let mut bits = [0u8; BITMAP_LEN];
            bits.copy_from_slice(&buf[BITMAP_OFFSET..BITMAP_OFFSET + BITMAP_LEN]);
            {
                let mut bitmap = Bitmap::new(&mut bits);
                for p in 0..RESERVED_PAGE_COUNT {
                    bitmap.set(p);
                }
            }
            buf[BITMAP_OFFSET..BITMAP_OFFSET + BITMAP_LEN].copy_from_slice(&bits);
            pager.write_raw_page(0, &buf)?;
        }

        pager.sync()?;
        pager.mark_dirty()?;
        pager.sync()?;
        Ok(pager)
    }

    /// Open an existing database file at `path`.
    pub fn open(path: &Path) -> DbResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut buf = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        let header = FileHeader::decode(&buf[..HEADER_PREFIX_LEN])?;
        if header.page_size != PAGE_SIZE as u32 {
            return Err(DbError::Corruption(format!(
                "page size mismatch: file uses {}, engine uses {PAGE_SIZE}",
                header.page_size
            )));
        }
        Ok(Self { file, header })
    }

    pub fn is_dirty(&self) -> bool {
        self.header.is_dirty()
    }

    /// Mark the database dirty on first mutation of a freshly opened file.
    /// A no-op if already dirty.
    pub fn mark_dirty(&mut self) -> DbResult<()> {
        if !self.header.is_dirty() {
            self.header.flags |= FLAG_DIRTY;
            self.write_header_page()?;
        }
        Ok(())
    }

    /// Clear the dirty flag after a clean shutdown or successful recovery.
    /// Requires the WAL buffer to be empty (`wal_head == wal_tail == 0`).
    pub fn clear_dirty(&mut self) -> DbResult<()> {
        self.header.flags &= !FLAG_DIRTY;
        self.header.wal_head = 0;
        self.header.wal_tail = 0;
        self.write_header_page()
    }

    pub fn wal_head(&self) -> u32 {
        self.header.wal_head
    }

    pub fn wal_tail(&self) -> u32 {
        self.header.wal_tail
    }

    pub fn set_wal_cursors(&mut self, head: u32, tail: u32) -> DbResult<()> {
        self.header.wal_head = head;
        self.header.wal_tail = tail;
        self.write_header_page()
    }

    pub fn root_page(&self) -> u32 {
        self.header.root_page
    }

    pub fn set_root_page(&mut self, page_no: u32) -> DbResult<()> {
        self.header.root_page = page_no;
        self.write_header_page()
    }

    pub fn catalog_root(&self) -> u32 {
        self.header.catalog_root
    }

    pub fn set_catalog_root(&mut self, page_no: u32) -> DbResult<()> {
        self.header.catalog_root = page_no;
        self.write_header_page()
    }

    pub fn page_count(&self) -> u32 {
        self.header.page_count
    }

    /// Allocate a page, reusing a freed slot from the bitmap when one
    /// exists, otherwise extending the file.
    pub fn allocate_page(&mut self, page_type: PageType) -> DbResult<u32> {
        let mut header_buf = [0u8; PAGE_SIZE];
        self.read_raw_page(0, &mut header_buf)?;
        let mut bits = [0u8; BITMAP_LEN];
        bits.copy_from_slice(&header_buf[BITMAP_OFFSET..BITMAP_OFFSET + BITMAP_LEN]);

        let page_no = {
            let mut bitmap = Bitmap::new(&mut bits);
            match bitmap.first_free_from(1) {
                Some(p) => {
                    bitmap.set(p);
                    p
                }
                None => return Err(DbError::Full("no free page slots".into())),
            }
        };

        header_buf[BITMAP_OFFSET..BITMAP_OFFSET + BITMAP_LEN].copy_from_slice(&bits);
        self.write_raw_page(0, &header_buf)?;

        if page_no >= self.header.page_count {
            self.header.page_count = page_no + 1;
            let needed_len = self.header.page_count as u64 * PAGE_SIZE as u64;
            if self.file.metadata()?.len() < needed_len {
                self.file.set_len(needed_len)?;
            }
        }
        self.write_header_page()?;

        let mut page_buf = [0u8; PAGE_SIZE];
        page::finalize_page(&mut page_buf, page_no, page_type);
        self.write_raw_page(page_no, &page_buf)?;

        Ok(page_no)
    }

    /// Free a previously allocated page by clearing its bitmap bit.
    pub fn free_page(&mut self, page_no: u32) -> DbResult<()> {
        if page_no == 0 || page_no < RESERVED_PAGE_COUNT {
            return Err(DbError::InvalidArgument(format!(
                "page {page_no} is reserved and cannot be freed"
            )));
        }
        let mut header_buf = [0u8; PAGE_SIZE];
        self.read_raw_page(0, &mut header_buf)?;
        let mut bits = [0u8; BITMAP_LEN];
        bits.copy_from_slice(&header_buf[BITMAP_OFFSET..BITMAP_OFFSET + BITMAP_LEN]);
        Bitmap::new(&mut bits).clear(page_no);
        header_buf[BITMAP_OFFSET..BITMAP_OFFSET + BITMAP_LEN].copy_from_slice(&bits);
        self.write_raw_page(0, &header_buf)?;

        let mut page_buf = [0u8; PAGE_SIZE];
        page::finalize_page(&mut page_buf, page_no, PageType::Free);
        self.write_raw_page(page_no, &page_buf)
    }

    /// Read page `page_no`'s raw bytes and verify its checksum (skipped for
    /// the header page and freshly-zeroed free pages).
    pub fn read_page(&mut self, page_no: u32) -> DbResult<[u8; PAGE_SIZE]> {
        let mut buf = [0u8; PAGE_SIZE];
        self.read_raw_page(page_no, &mut buf)?;
        if page_no != 0 && page::page_type_of(&buf)? != PageType::Free {
            page::verify_checksum(&buf)?;
            let stored_page_no = page::page_num_of(&buf);
            if stored_page_no != page_no {
                return Err(DbError::Corruption(format!(
                    "page {page_no} header stamped with page_num {stored_page_no}"
                )));
            }
        }
        Ok(buf)
    }

    /// Stamp `page_no`/`page_type`, recompute the checksum, and write the
    /// page back to its home location.
    pub fn write_page(
        &mut self,
        page_no: u32,
        page_type: PageType,
        mut buf: [u8; PAGE_SIZE],
    ) -> DbResult<()> {
        page::finalize_page(&mut buf, page_no, page_type);
        self.write_raw_page(page_no, &buf)
    }

    /// Write a page image exactly as given, without re-stamping it. Used by
    /// WAL redo, which replays the committed image verbatim.
    pub fn write_page_image(&mut self, page_no: u32, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        self.write_raw_page(page_no, buf)
    }

    pub fn sync(&mut self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Close the pager for a clean shutdown: if no WAL work is pending
    /// (`wal_head == 0`), clear the dirty flag so the next open skips
    /// recovery. Always fsyncs before the file handle is dropped.
    pub fn close(mut self) -> DbResult<()> {
        if self.header.wal_head == 0 {
            self.clear_dirty()?;
        }
        self.sync()
    }

    /// Raw read of the fixed WAL region, independent of page boundaries.
    pub fn read_wal_region(&mut self) -> DbResult<Vec<u8>> {
        let mut buf = vec![0u8; WAL_REGION_BYTE_LEN as usize];
        self.file.seek(SeekFrom::Start(WAL_REGION_BYTE_OFFSET))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Raw write into the fixed WAL region, independent of page boundaries.
    pub fn write_wal_region(&mut self, offset: u64, bytes: &[u8]) -> DbResult<()> {
        if offset + bytes.len() as u64 > WAL_REGION_BYTE_LEN {
            return Err(DbError::Full("WAL region overflow".into()));
        }
        self.file
            .seek(SeekFrom::Start(WAL_REGION_BYTE_OFFSET + offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn read_raw_page(&mut self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        self.file
            .seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_raw_page(&mut self, page_no: u32, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        self.file
            .seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn write_header_page(&mut self) -> DbResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        self.read_raw_page(0, &mut buf)?;
        self.header.encode(&mut buf[..HEADER_PREFIX_LEN]);
        self.write_raw_page(0, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn new_pager() -> (tempfile::TempDir, Pager) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pager = Pager::create(&path).unwrap();
        (dir, pager)
    }

    #[test]
    fn create_reserves_header_and_wal_pages() {
        let (_dir, mut pager) = new_pager();
        assert_eq!(pager.page_count(), RESERVED_PAGE_COUNT);
        // First allocatable page skips the reserved range.
        let p = pager.allocate_page(PageType::Btree).unwrap();
        assert_eq!(p, RESERVED_PAGE_COUNT);
    }

    #[test]
    fn allocate_and_free_reuses_slot() {
        let (_dir, mut pager) = new_pager();
        let a = pager.allocate_page(PageType::Btree).unwrap();
        let b = pager.allocate_page(PageType::Btree).unwrap();
        assert!(b > a);
        pager.free_page(a).unwrap();
        let c = pager.allocate_page(PageType::Btree).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn write_then_read_round_trips_and_checks_out() {
        let (_dir, mut pager) = new_pager();
        let p = pager.allocate_page(PageType::Btree).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        buf[20] = 0x42;
        pager.write_page(p, PageType::Btree, buf).unwrap();

        let read_back = pager.read_page(p).unwrap();
        assert_eq!(read_back[20], 0x42);
    }

    #[test]
    fn corrupted_page_fails_checksum() {
        let (_dir, mut pager) = new_pager();
        let p = pager.allocate_page(PageType::Btree).unwrap();
        let buf = [0u8; PAGE_SIZE];
        pager.write_page(p, PageType::Btree, buf).unwrap();

        let mut raw = pager.read_page(p).unwrap();
        raw[100] ^= 0xFF;
        // simulate on-disk corruption by writing the tampered image back
        // verbatim, bypassing re-stamping.
        pager.write_page_image(p, &raw).unwrap();
        assert!(pager.read_page(p).is_err());
    }

    #[test]
    fn newly_created_database_is_dirty() {
        let (_dir, pager) = new_pager();
        assert!(pager.is_dirty());
    }

    #[test]
    fn dirty_flag_lifecycle() {
        let (_dir, mut pager) = new_pager();
        pager.clear_dirty().unwrap();
        assert!(!pager.is_dirty());
        pager.mark_dirty().unwrap();
        assert!(pager.is_dirty());
        pager.clear_dirty().unwrap();
        assert!(!pager.is_dirty());
    }

    #[test]
    fn close_clears_dirty_flag_only_when_wal_is_empty() {
        let (dir, mut pager) = new_pager();
        pager.set_wal_cursors(128, 0).unwrap();
        pager.close().unwrap();
        let reopened = Pager::open(&dir.path().join("test.db")).unwrap();
        assert!(reopened.is_dirty());

        let (_dir2, mut pager2) = new_pager();
        pager2.set_wal_cursors(0, 0).unwrap();
        let path2 = _dir2.path().join("test.db");
        pager2.close().unwrap();
        let reopened2 = Pager::open(&path2).unwrap();
        assert!(!reopened2.is_dirty());
    }

    #[test]
    fn catalog_and_root_page_persist() {
        let (dir, mut pager) = new_pager();
        pager.set_root_page(40).unwrap();
        pager.set_catalog_root(41).unwrap();
        pager.sync().unwrap();
        drop(pager);

        let path = dir.path().join("test.db");
        let reopened = Pager::open(&path).unwrap();
        assert_eq!(reopened.root_page(), 40);
        assert_eq!(reopened.catalog_root(), 41);
    }

    #[test]
    fn reserved_pages_cannot_be_freed() {
        let (_dir, mut pager) = new_pager();
        assert!(pager.free_page(0).is_err());
        assert!(pager.free_page(WAL_REGION_START_PAGE).is_err());
    }
}
