use common::le::{read_u32, write_u32};
use common::{DbError, DbResult};

/// Magic value stamped into every database file: ASCII-derived "AmiD".
pub const MAGIC: u32 = 0x416D_6944;
pub const FORMAT_VERSION: u32 = 1;

/// Flag bit in [`FileHeader::flags`] meaning "WAL region may hold
/// uncommitted-on-data, committed-in-WAL pages that still need redo".
pub const FLAG_DIRTY: u32 = 0x0001;

/// Byte length of the packed header fields, before the reserved pad.
const HEADER_FIELDS_LEN: usize = 44;
/// Total length of the header prefix (fields + reserved pad) before the
/// free-page bitmap begins.
pub const HEADER_PREFIX_LEN: usize = 64;
/// Byte offset of the free-page bitmap within page 0.
pub const BITMAP_OFFSET: usize = HEADER_PREFIX_LEN;
/// Length of the free-page bitmap in bytes: one bit per page, up to
/// `AMIDB_MAX_PAGES` pages.
pub const BITMAP_LEN: usize = 512;
/// Highest page number representable by the bitmap.
pub const MAX_PAGES: u32 = (BITMAP_LEN * 8) as u32;

/// The fixed-layout file header stored at the start of page 0.
///
/// Field order and widths are byte-offset mandated: every field is a
/// little-endian `u32`, 44 bytes total, padded out to a 64-byte prefix so
/// the free-page bitmap starts at a round offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub page_count: u32,
    pub first_free_page: u32,
    pub root_page: u32,
    pub wal_offset: u32,
    pub flags: u32,
    pub wal_head: u32,
    pub wal_tail: u32,
    pub catalog_root: u32,
}

impl FileHeader {
    pub fn new(page_size: u32, page_count: u32, wal_offset: u32) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            page_size,
            page_count,
            first_free_page: 0,
            root_page: 0,
            wal_offset,
            flags: 0,
            wal_head: 0,
            wal_tail: 0,
            catalog_root: 0,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & FLAG_DIRTY != 0
    }

    pub fn encode(&self, buf: &mut [u8]) {
        assert!(buf.len() >= HEADER_FIELDS_LEN);
        write_u32(&mut buf[0..4], self.magic);
        write_u32(&mut buf[4..8], self.version);
        write_u32(&mut buf[8..12], self.page_size);
        write_u32(&mut buf[12..16], self.page_count);
        write_u32(&mut buf[16..20], self.first_free_page);
        write_u32(&mut buf[20..24], self.root_page);
        write_u32(&mut buf[24..28], self.wal_offset);
        write_u32(&mut buf[28..32], self.flags);
        write_u32(&mut buf[32..36], self.wal_head);
        write_u32(&mut buf[36..40], self.wal_tail);
        write_u32(&mut buf[40..44], self.catalog_root);
    }

    pub fn decode(buf: &[u8]) -> DbResult<Self> {
        if buf.len() < HEADER_FIELDS_LEN {
            return Err(DbError::Corruption("file header truncated".into()));
        }
        let header = Self {
            magic: read_u32(&buf[0..4]),
            version: read_u32(&buf[4..8]),
            page_size: read_u32(&buf[8..12]),
            page_count: read_u32(&buf[12..16]),
            first_free_page: read_u32(&buf[16..20]),
            root_page: read_u32(&buf[20..24]),
            wal_offset: read_u32(&buf[24..28]),
            flags: read_u32(&buf[28..32]),
            wal_head: read_u32(&buf[32..36]),
            wal_tail: read_u32(&buf[36..40]),
            catalog_root: read_u32(&buf[40..44]),
        };
        if header.magic != MAGIC {
            return Err(DbError::Corruption(format!(
                "bad magic: expected {MAGIC:#x}, found {:#x}",
                header.magic
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(DbError::Corruption(format!(
                "unsupported format version {}",
                header.version
            )));
        }
        Ok(header)
    }
}

/// Free-page bitmap: bit `n` set means page `n` is allocated. Bit 0 (page
/// 0, the header page) is always set.
pub struct Bitmap<'a> {
    bits: &'a mut [u8],
}

impl<'a> Bitmap<'a> {
    pub fn new(bits: &'a mut [u8]) -> Self {
        debug_assert_eq!(bits.len(), BITMAP_LEN);
        Self { bits }
    }

    pub fn is_set(&self, page_no: u32) -> bool {
        let idx = page_no as usize;
        (self.bits[idx / 8] & (1 << (idx % 8))) != 0
    }

    pub fn set(&mut self, page_no: u32) {
        let idx = page_no as usize;
        self.bits[idx / 8] |= 1 << (idx % 8);
    }

    pub fn clear(&mut self, page_no: u32) {
        let idx = page_no as usize;
        self.bits[idx / 8] &= !(1 << (idx % 8));
    }

    /// First unset bit at or above `start`, or `None` if the bitmap is full.
    pub fn first_free_from(&self, start: u32) -> Option<u32> {
        (start..MAX_PAGES).find(|&p| !self.is_set(p))
    }
}
