use crate::crc32::crc32;
use common::le::{read_u32, write_u32};
use common::{DbError, DbResult};

pub const PAGE_SIZE: usize = 4096;
/// Length of the per-page header: page_num + page_type + reserved + checksum.
pub const PAGE_HEADER_LEN: usize = 12;

/// Page type tags, stamped into byte 4 of every non-header page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Free = 0,
    Header = 1,
    Btree = 2,
    Overflow = 3,
    Freelist = 4,
    Wal = 5,
    /// Catalog schema page: one per table, holds the bincode-packed
    /// `TableSchema` the catalog's B+Tree maps a table-name hash to.
    Catalog = 6,
    /// Row-storage page: holds one row-codec payload, pointed to by the
    /// `u32` value slot of a table's data B+Tree leaf.
    Data = 7,
}

impl PageType {
    pub fn from_u8(v: u8) -> DbResult<Self> {
        Ok(match v {
            0 => PageType::Free,
            1 => PageType::Header,
            2 => PageType::Btree,
            3 => PageType::Overflow,
            4 => PageType::Freelist,
            5 => PageType::Wal,
            6 => PageType::Catalog,
            7 => PageType::Data,
            other => return Err(DbError::Corruption(format!("unknown page type {other}"))),
        })
    }
}

/// Stamp `page_no`/`page_type` into the page header and recompute the
/// checksum over `buf[12..PAGE_SIZE]`, writing it into `buf[8..12]`.
pub fn finalize_page(buf: &mut [u8; PAGE_SIZE], page_no: u32, page_type: PageType) {
    write_u32(&mut buf[0..4], page_no);
    buf[4] = page_type as u8;
    buf[5] = 0;
    buf[6] = 0;
    buf[7] = 0;
    let checksum = crc32(&buf[PAGE_HEADER_LEN..]);
    write_u32(&mut buf[8..12], checksum);
}

/// Page number stamped in `buf[0..4]`.
pub fn page_num_of(buf: &[u8; PAGE_SIZE]) -> u32 {
    read_u32(&buf[0..4])
}

/// Page type stamped in `buf[4]`.
pub fn page_type_of(buf: &[u8; PAGE_SIZE]) -> DbResult<PageType> {
    PageType::from_u8(buf[4])
}

/// Verify that `buf[8..12]` matches `crc32(buf[12..])`.
pub fn verify_checksum(buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
    let stored = read_u32(&buf[8..12]);
    let computed = crc32(&buf[PAGE_HEADER_LEN..]);
    if stored != computed {
        return Err(DbError::Corruption(format!(
            "page checksum mismatch: stored {stored:#x}, computed {computed:#x}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn finalize_then_verify_succeeds() {
        let mut buf = [0u8; PAGE_SIZE];
        buf[PAGE_HEADER_LEN] = 0xAB;
        finalize_page(&mut buf, 7, PageType::Btree);
        assert_eq!(page_num_of(&buf), 7);
        assert_eq!(page_type_of(&buf).unwrap(), PageType::Btree);
        verify_checksum(&buf).unwrap();
    }

    #[test]
    fn tampering_breaks_checksum() {
        let mut buf = [0u8; PAGE_SIZE];
        finalize_page(&mut buf, 1, PageType::Btree);
        buf[PAGE_HEADER_LEN + 1] ^= 0xFF;
        assert!(verify_checksum(&buf).is_err());
    }

    proptest! {
        // Spec §8: for any page read back after a write, the stored
        // page_num and checksum must match the body exactly.
        #[test]
        fn finalize_always_verifies(page_no in any::<u32>(), byte in any::<u8>(), pos in PAGE_HEADER_LEN..PAGE_SIZE) {
            let mut buf = [0u8; PAGE_SIZE];
            buf[pos] = byte;
            finalize_page(&mut buf, page_no, PageType::Btree);
            prop_assert_eq!(page_num_of(&buf), page_no);
            prop_assert!(verify_checksum(&buf).is_ok());
        }

        // A single flipped bit anywhere in the body must be caught.
        #[test]
        fn single_bit_flip_is_detected(pos in PAGE_HEADER_LEN..PAGE_SIZE, bit in 0u8..8) {
            let mut buf = [0u8; PAGE_SIZE];
            finalize_page(&mut buf, 3, PageType::Btree);
            buf[pos] ^= 1 << bit;
            prop_assert!(verify_checksum(&buf).is_err());
        }
    }
}
