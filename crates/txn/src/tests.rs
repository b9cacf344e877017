use super::*;
use storage::{PageType, Pager};
use tempfile::tempdir;

fn new_cache(path: &std::path::Path) -> BufferCache {
    BufferCache::new(Pager::create(path).unwrap(), 16)
}

#[test]
fn begin_requires_idle() {
    let dir = tempdir().unwrap();
    let mut cache = new_cache(&dir.path().join("t.db"));
    let mut txn = TransactionManager::new(Wal::create());
    txn.begin(&mut cache).unwrap();
    assert_eq!(txn.state(), TxnState::Active);
    assert!(matches!(txn.begin(&mut cache), Err(DbError::Busy(_))));
    txn.abort(&mut cache).unwrap();
    assert_eq!(txn.state(), TxnState::Idle);
}

#[test]
fn commit_durability_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let mut cache = new_cache(&path);
    let page = cache.pager_mut().allocate_page(PageType::Btree).unwrap();

    let mut txn = TransactionManager::new(Wal::create());
    txn.begin(&mut cache).unwrap();
    let idx = cache.get_page(page).unwrap();
    cache.frame_bytes_mut(idx)[12] = 0xAA;
    txn.add_dirty_page(&mut cache, page).unwrap();
    txn.commit(&mut cache).unwrap();

    cache.pager_mut().sync().unwrap();
    let on_disk = cache.pager_mut().read_page(page).unwrap();
    assert_eq!(on_disk[12], 0xAA);
    // The header dirty flag stays set until a clean close; eager checkpoint
    // only guarantees the WAL cursor is reset.
    assert_eq!(cache.pager().wal_head(), 0);
    assert!(cache.pager().is_dirty());
}

#[test]
fn abort_rolls_back_to_pre_transaction_image() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let mut cache = new_cache(&path);
    let page = cache.pager_mut().allocate_page(PageType::Btree).unwrap();

    // Committed baseline: byte 12 = 0x11.
    let mut txn = TransactionManager::new(Wal::create());
    txn.begin(&mut cache).unwrap();
    let idx = cache.get_page(page).unwrap();
    cache.frame_bytes_mut(idx)[12] = 0x11;
    txn.add_dirty_page(&mut cache, page).unwrap();
    txn.commit(&mut cache).unwrap();

    // New transaction writes 0x99, then aborts.
    txn.begin(&mut cache).unwrap();
    let idx = cache.get_page(page).unwrap();
    cache.frame_bytes_mut(idx)[12] = 0x99;
    txn.add_dirty_page(&mut cache, page).unwrap();
    txn.abort(&mut cache).unwrap();

    let idx = cache.get_page(page).unwrap();
    assert_eq!(cache.frame_bytes(idx)[12], 0x11);
}

#[test]
fn dirty_page_cap_rejects_a_65th_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let mut cache = BufferCache::new(Pager::create(&path).unwrap(), MAX_DIRTY_PAGES + 8);
    let mut txn = TransactionManager::new(Wal::create());
    txn.begin(&mut cache).unwrap();

    for _ in 0..MAX_DIRTY_PAGES {
        let page = cache.pager_mut().allocate_page(PageType::Btree).unwrap();
        let idx = cache.get_page(page).unwrap();
        cache.frame_bytes_mut(idx)[12] = 1;
        txn.add_dirty_page(&mut cache, page).unwrap();
    }

    let page = cache.pager_mut().allocate_page(PageType::Btree).unwrap();
    cache.get_page(page).unwrap();
    assert!(matches!(
        txn.add_dirty_page(&mut cache, page),
        Err(DbError::Full(_))
    ));
}

#[test]
fn crash_recovery_redoes_committed_transaction() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let page;
    {
        let mut cache = new_cache(&path);
        page = cache.pager_mut().allocate_page(PageType::Btree).unwrap();
        let mut txn = TransactionManager::new(Wal::create());
        txn.begin(&mut cache).unwrap();
        let idx = cache.get_page(page).unwrap();
        cache.frame_bytes_mut(idx)[12] = 0xBB;
        txn.add_dirty_page(&mut cache, page).unwrap();

        // Simulate a crash right after the WAL flush (durable) but before
        // the eager checkpoint writes the page to its home location: log,
        // flush, then stop short of the checkpoint that `commit` would run.
        for &p in &[page] {
            let idx = cache.find_entry(p).unwrap();
            let image = *cache.frame_bytes(idx);
            txn_wal_mut(&mut txn).write_page(1, p, &image).unwrap();
        }
        txn_wal_mut(&mut txn).write_commit(1).unwrap();
        cache.pager_mut().mark_dirty().unwrap();
        txn_wal_mut(&mut txn).flush(cache.pager_mut()).unwrap();
    }

    let mut pager = Pager::open(&path).unwrap();
    assert!(pager.is_dirty());
    Wal::recover(&mut pager).unwrap();
    assert!(!pager.is_dirty());
    let on_disk = pager.read_page(page).unwrap();
    assert_eq!(on_disk[12], 0xBB);
}

// Test-only accessor: the WAL is private state of the transaction manager
// in normal operation; this scenario needs to drive it directly to
// simulate a crash between flush and checkpoint.
fn txn_wal_mut(txn: &mut TransactionManager) -> &mut Wal {
    &mut txn.wal
}
