//! Top-level facade: wires pager → buffer cache → WAL → transaction
//! manager → catalog → executor into the single handle an embedder opens.
//!
//! Recovery runs inline in [`Database::open`]: if the header's dirty flag
//! is set, the WAL region is replayed into the data file before the
//! buffer cache or catalog ever touch a page, so every subsequent read
//! already sees the post-recovery image.


use buffer::BufferCache;
use catalog::{Catalog, ColumnDef};
use common::{Config, DbResult, TxnId};
use executor::Predicate;
use storage::Pager;
use txn::TransactionManager;
use types::Value;
use wal::Wal;

/// An open database: one pager, one buffer cache, one transaction
/// manager, one catalog. Only a single in-flight transaction is
/// supported, matching [`txn::TransactionManager`].
pub struct Database {
    cache: BufferCache,
    txn: TransactionManager,
    catalog: Catalog,
}

impl Database {
    /// Create a brand new database file at `config.data_dir` joined with
    /// `file_name`. Fails if the file already exists.
    pub fn create(config: &Config, file_name: &str) -> DbResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let pager = Pager::create(&config.data_dir.join(file_name))?;
        Self::from_pager(pager, config.buffer_pool_pages)
    }

    /// Open an existing database file, recovering from the WAL region
    /// first if the header's dirty flag indicates an unclean prior
    /// shutdown.
    pub fn open(config: &Config, file_name: &str) -> DbResult<Self> {
        let mut pager = Pager::open(&config.data_dir.join(file_name))?;
        if pager.is_dirty() {
            Wal::recover(&mut pager)?;
            pager.clear_dirty()?;
        }
        Self::from_pager(pager, config.buffer_pool_pages)
    }

    fn from_pager(pager: Pager, buffer_pool_pages: usize) -> DbResult<Self> {
        let mut cache = BufferCache::new(pager, buffer_pool_pages);
        let catalog = Catalog::open(&mut cache)?;
        Ok(Self {
            cache,
            txn: TransactionManager::new(Wal::create()),
            catalog,
        })
    }

    /// Flush every untagged dirty page and close the underlying file.
    /// Only safe to call with no transaction in flight.
    pub fn close(self) -> DbResult<()> {
        let pager = self.cache.into_pager()?;
        pager.close()
    }

    pub fn begin(&mut self) -> DbResult<TxnId> {
        self.txn.begin(&mut self.cache)
    }

    pub fn commit(&mut self) -> DbResult<()> {
        self.txn.commit(&mut self.cache)
    }

    pub fn abort(&mut self) -> DbResult<()> {
        self.txn.abort(&mut self.cache)
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnDef>) -> DbResult<()> {
        executor::create_table(&mut self.cache, &mut self.txn, &mut self.catalog, name, columns)
    }

    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        executor::drop_table(&mut self.cache, &mut self.txn, &mut self.catalog, name)
    }

    pub fn list_tables(&mut self) -> DbResult<Vec<String>> {
        self.catalog.list_tables(&mut self.cache)
    }

    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> DbResult<()> {
        executor::insert(&mut self.cache, &mut self.txn, &mut self.catalog, table, values)
    }

    pub fn select(&mut self, table: &str, predicate: Option<&Predicate>) -> DbResult<Vec<Vec<Value>>> {
        executor::select(&mut self.cache, &self.catalog, table, predicate)
    }

    pub fn update(
        &mut self,
        table: &str,
        column: &str,
        new_value: Value,
        predicate: Option<&Predicate>,
    ) -> DbResult<u32> {
        executor::update(&mut self.cache, &mut self.txn, &mut self.catalog, table, column, new_value, predicate)
    }

    pub fn delete(&mut self, table: &str, predicate: Option<&Predicate>) -> DbResult<u32> {
        executor::delete(&mut self.cache, &mut self.txn, &mut self.catalog, table, predicate)
    }
}
