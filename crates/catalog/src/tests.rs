use super::*;
use storage::Pager;
use tempfile::tempdir;

// The catalog crate has no transaction manager of its own; tests drive
// mutations with the same untagged no-op tracker the btree crate uses
// outside a transaction.
mod buffer_helpers {
    pub use buffer::NoTxn;
}

fn new_cache(capacity: usize) -> (tempfile::TempDir, BufferCache) {
    let dir = tempdir().unwrap();
    let pager = Pager::create(&dir.path().join("cat.db")).unwrap();
    (dir, BufferCache::new(pager, capacity))
}

fn cols(defs: &[(&str, SqlType, bool, bool)]) -> Vec<ColumnDef> {
    defs.iter()
        .map(|(name, ty, pk, nn)| ColumnDef {
            name: name.to_string(),
            sql_type: *ty,
            is_primary_key: *pk,
            not_null: *nn,
        })
        .collect()
}

#[test]
fn hash_is_stable_and_non_negative() {
    assert_eq!(hash_table_name("users"), hash_table_name("users"));
    assert!(hash_table_name("users") >= 0);
    assert_ne!(hash_table_name("users"), hash_table_name("orders"));
}

#[test]
fn create_then_get_round_trips_schema() {
    let (_dir, mut cache) = new_cache(32);
    let mut catalog = Catalog::open(&mut cache).unwrap();
    let mut txn = buffer_helpers::NoTxn;

    let columns = cols(&[
        ("id", SqlType::Integer, true, true),
        ("name", SqlType::Text, false, false),
    ]);
    catalog.create_table(&mut cache, &mut txn, "users", columns.clone()).unwrap();

    let schema = catalog.get_table(&mut cache, "users").unwrap();
    assert_eq!(schema.name, "users");
    assert_eq!(schema.columns, columns);
    assert_eq!(schema.primary_key_index, Some(0));
    assert_eq!(schema.next_rowid, 1);
    assert_eq!(schema.row_count, 0);
}

#[test]
fn implicit_rowid_when_no_primary_key_declared() {
    let (_dir, mut cache) = new_cache(32);
    let mut catalog = Catalog::open(&mut cache).unwrap();
    let mut txn = buffer_helpers::NoTxn;

    let columns = cols(&[("note", SqlType::Text, false, false)]);
    catalog.create_table(&mut cache, &mut txn, "notes", columns).unwrap();

    let schema = catalog.get_table(&mut cache, "notes").unwrap();
    assert_eq!(schema.primary_key_index, None);
}

#[test]
fn duplicate_table_name_is_rejected() {
    let (_dir, mut cache) = new_cache(32);
    let mut catalog = Catalog::open(&mut cache).unwrap();
    let mut txn = buffer_helpers::NoTxn;

    let columns = cols(&[("id", SqlType::Integer, true, true)]);
    catalog.create_table(&mut cache, &mut txn, "users", columns.clone()).unwrap();
    assert!(matches!(
        catalog.create_table(&mut cache, &mut txn, "users", columns),
        Err(DbError::AlreadyExists(_))
    ));
}

#[test]
fn unknown_table_is_not_found() {
    let (_dir, mut cache) = new_cache(32);
    let catalog = Catalog::open(&mut cache).unwrap();
    assert!(matches!(
        catalog.get_table(&mut cache, "ghost"),
        Err(DbError::NotFound(_))
    ));
}

#[test]
fn update_table_persists_row_count() {
    let (_dir, mut cache) = new_cache(32);
    let mut catalog = Catalog::open(&mut cache).unwrap();
    let mut txn = buffer_helpers::NoTxn;

    let columns = cols(&[("id", SqlType::Integer, true, true)]);
    catalog.create_table(&mut cache, &mut txn, "users", columns).unwrap();

    let mut schema = catalog.get_table(&mut cache, "users").unwrap();
    schema.row_count = 5;
    schema.next_rowid = 6;
    catalog.update_table(&mut cache, &mut txn, &schema).unwrap();

    let reloaded = catalog.get_table(&mut cache, "users").unwrap();
    assert_eq!(reloaded.row_count, 5);
    assert_eq!(reloaded.next_rowid, 6);
}

#[test]
fn drop_table_removes_entry_and_frees_pages() {
    let (_dir, mut cache) = new_cache(32);
    let mut catalog = Catalog::open(&mut cache).unwrap();
    let mut txn = buffer_helpers::NoTxn;

    let columns = cols(&[("id", SqlType::Integer, true, true)]);
    catalog.create_table(&mut cache, &mut txn, "users", columns).unwrap();
    catalog.drop_table(&mut cache, &mut txn, "users").unwrap();

    assert!(matches!(
        catalog.get_table(&mut cache, "users"),
        Err(DbError::NotFound(_))
    ));
    assert!(matches!(
        catalog.drop_table(&mut cache, &mut txn, "users"),
        Err(DbError::NotFound(_))
    ));
}

#[test]
fn list_tables_reflects_creates_and_drops() {
    let (_dir, mut cache) = new_cache(32);
    let mut catalog = Catalog::open(&mut cache).unwrap();
    let mut txn = buffer_helpers::NoTxn;

    for name in ["users", "orders", "products"] {
        let columns = cols(&[("id", SqlType::Integer, true, true)]);
        catalog.create_table(&mut cache, &mut txn, name, columns).unwrap();
    }

    let mut names = catalog.list_tables(&mut cache).unwrap();
    names.sort();
    assert_eq!(names, vec!["orders", "products", "users"]);

    catalog.drop_table(&mut cache, &mut txn, "orders").unwrap();
    let mut names = catalog.list_tables(&mut cache).unwrap();
    names.sort();
    assert_eq!(names, vec!["products", "users"]);
}

#[test]
fn reopening_catalog_reuses_existing_root() {
    let (_dir, mut cache) = new_cache(32);
    {
        let mut catalog = Catalog::open(&mut cache).unwrap();
        let mut txn = buffer_helpers::NoTxn;
        let columns = cols(&[("id", SqlType::Integer, true, true)]);
        catalog.create_table(&mut cache, &mut txn, "users", columns).unwrap();
    }

    let reopened = Catalog::open(&mut cache).unwrap();
    let schema = reopened.get_table(&mut cache, "users").unwrap();
    assert_eq!(schema.name, "users");
}

#[test]
fn too_many_columns_is_rejected() {
    let (_dir, mut cache) = new_cache(32);
    let mut catalog = Catalog::open(&mut cache).unwrap();
    let mut txn = buffer_helpers::NoTxn;

    let defs: Vec<(&str, SqlType, bool, bool)> = (0..MAX_COLUMNS + 1)
        .map(|_| ("c", SqlType::Integer, false, false))
        .collect();
    let columns = cols(&defs);
    assert!(matches!(
        catalog.create_table(&mut cache, &mut txn, "wide", columns),
        Err(DbError::InvalidArgument(_))
    ));
}
