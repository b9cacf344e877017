use super::*;
use std::io;

#[test]
fn config_defaults_are_sane() {
    let cfg = Config::default();
    assert_eq!(cfg.page_size, 4096);
    assert_eq!(cfg.buffer_pool_pages, 256);
    assert!(cfg.wal_enabled);
}

#[test]
fn config_builder_overrides_defaults() {
    let cfg = Config::builder()
        .data_dir(PathBuf::from("/tmp/somedb"))
        .wal_enabled(false)
        .build();
    assert_eq!(cfg.data_dir, PathBuf::from("/tmp/somedb"));
    assert!(!cfg.wal_enabled);
    assert_eq!(cfg.page_size, 4096);
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::Corruption("bad checksum".into());
    assert!(format!("{err}").contains("corruption"));
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}
