use super::*;
use storage::{PageType, Pager, PAGE_SIZE};
use tempfile::tempdir;

fn new_pager() -> (tempfile::TempDir, Pager) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    (dir, Pager::create(&path).unwrap())
}

#[test]
fn begin_page_commit_flush_advances_head() {
    let (_dir, mut pager) = new_pager();
    let mut wal = Wal::create();

    let txn_id = wal.next_txn_id();
    wal.write_begin(txn_id).unwrap();
    let image = [0xAAu8; PAGE_SIZE];
    wal.write_page(txn_id, 40, &image).unwrap();
    wal.write_commit(txn_id).unwrap();

    assert_eq!(pager.wal_head(), 0);
    wal.flush(&mut pager).unwrap();
    assert!(pager.wal_head() > 0);
    assert_eq!(wal.buffer_len(), 0);
}

#[test]
fn txn_ids_are_monotonic() {
    let mut wal = Wal::create();
    let a = wal.next_txn_id();
    let b = wal.next_txn_id();
    assert!(b > a);
}

#[test]
fn write_record_fails_when_buffer_full() {
    let mut wal = Wal::create();
    let txn_id = wal.next_txn_id();
    let image = [0u8; PAGE_SIZE];
    let mut count = 0;
    loop {
        match wal.write_page(txn_id, count, &image) {
            Ok(()) => count += 1,
            Err(DbError::Full(_)) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    // The buffer's contents are unchanged by the failed write: the last
    // successful append is still the most recent record.
    assert!(wal.buffer_len() > 0);
}

#[test]
fn truncate_buffer_discards_uncommitted_span() {
    let mut wal = Wal::create();
    let txn_id = wal.next_txn_id();
    let start = wal.buffer_len();
    wal.write_begin(txn_id).unwrap();
    wal.write_page(txn_id, 40, &[0u8; PAGE_SIZE]).unwrap();
    assert!(wal.buffer_len() > start);
    wal.truncate_buffer(start);
    assert_eq!(wal.buffer_len(), start);
}

#[test]
fn recover_replays_committed_page_and_discards_uncommitted() {
    let (_dir, mut pager) = new_pager();
    let data_page = pager.allocate_page(PageType::Btree).unwrap();

    let mut wal = Wal::create();

    // Transaction 1: committed, sets byte 12 to 0x22.
    let t1 = wal.next_txn_id();
    wal.write_begin(t1).unwrap();
    let mut image1 = [0u8; PAGE_SIZE];
    image1[12] = 0x22;
    wal.write_page(t1, data_page, &image1).unwrap();
    wal.write_commit(t1).unwrap();
    wal.flush(&mut pager).unwrap();

    // Transaction 2: never commits (simulated crash mid-commit).
    let t2 = wal.next_txn_id();
    wal.write_begin(t2).unwrap();
    let mut image2 = [0u8; PAGE_SIZE];
    image2[12] = 0x77;
    wal.write_page(t2, data_page, &image2).unwrap();
    wal.flush(&mut pager).unwrap();

    pager.mark_dirty().unwrap();
    assert!(pager.is_dirty());

    Wal::recover(&mut pager).unwrap();

    assert!(!pager.is_dirty());
    assert_eq!(pager.wal_head(), 0);
    let page = pager.read_page(data_page).unwrap();
    assert_eq!(page[12], 0x22);
}

#[test]
fn recover_is_noop_over_empty_region() {
    let (_dir, mut pager) = new_pager();
    pager.mark_dirty().unwrap();
    Wal::recover(&mut pager).unwrap();
    assert!(!pager.is_dirty());
}

#[test]
fn corrupt_record_stops_recovery_at_that_point() {
    let (_dir, mut pager) = new_pager();
    let data_page = pager.allocate_page(PageType::Btree).unwrap();

    let mut wal = Wal::create();
    let t1 = wal.next_txn_id();
    wal.write_begin(t1).unwrap();
    let mut image = [0u8; PAGE_SIZE];
    image[12] = 0x99;
    wal.write_page(t1, data_page, &image).unwrap();
    wal.write_commit(t1).unwrap();
    wal.flush(&mut pager).unwrap();

    // Corrupt the first byte of the region (the BEGIN record's magic).
    pager.write_wal_region(0, &[0u8]).unwrap();
    pager.mark_dirty().unwrap();

    Wal::recover(&mut pager).unwrap();

    // The corrupt record stopped recovery before the COMMIT was ever seen,
    // so the data page is untouched.
    let page = pager.read_page(data_page).unwrap();
    assert_eq!(page[12], 0);
}
