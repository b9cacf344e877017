//! Persistent schema storage: table definitions live in a dedicated
//! B+Tree (the "catalog tree") keyed by a hash of the table name, whose
//! root page is recorded in the file header alongside the data region's
//! own root.
//!
//! Each catalog entry's value is a page number holding the bincode-packed
//! [`TableSchema`] for that table, not the schema itself — the catalog
//! tree only ever stores `i32 -> u32` pairs, same as any other B+Tree in
//! this engine.

#[cfg(test)]
mod tests;

use bincode::config::{self, Config};
use btree::Tree;
use buffer::{BufferCache, DirtyTracker};
use common::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use storage::{PageType, PAGE_HEADER_LEN, PAGE_SIZE};
use types::SqlType;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Maximum columns a table may declare, matching the row codec's cap.
pub const MAX_COLUMNS: usize = 32;

/// One column's declared type and constraints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub not_null: bool,
}

/// Persistent metadata for a single table: everything needed to decode
/// its rows and route a statement to its data B+Tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Index into `columns` of the explicit `PRIMARY KEY` column, or
    /// `None` for an implicit auto-increment rowid.
    pub primary_key_index: Option<usize>,
    /// Root page of this table's row-data B+Tree.
    pub btree_root: u32,
    /// Next value handed out for an implicit rowid primary key.
    pub next_rowid: u32,
    /// Approximate row count, refreshed by the executor after writes.
    pub row_count: u32,
}

impl TableSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Stable non-negative hash of a table name, used as the catalog tree's
/// key. DJB2, masked to 31 bits to stay a valid `i32` B+Tree key.
pub fn hash_table_name(name: &str) -> i32 {
    let mut hash: u32 = 5381;
    for byte in name.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    (hash & 0x7FFF_FFFF) as i32
}

/// Owns the catalog tree and mediates every table-definition read/write.
pub struct Catalog {
    tree: Tree,
}

impl Catalog {
    /// Open the catalog tree recorded in the file header, creating a
    /// fresh empty one (and persisting its root) if this is a new
    /// database.
    pub fn open(cache: &mut BufferCache) -> DbResult<Self> {
        let root = cache.pager().catalog_root();
        let tree = if root == 0 {
            let tree = Tree::create(cache)?;
            cache.pager_mut().set_catalog_root(tree.root_page())?;
            tree
        } else {
            Tree::open(cache, root)?
        };
        Ok(Self { tree })
    }

    fn write_schema_page(
        &self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        page_no: u32,
        schema: &TableSchema,
    ) -> DbResult<()> {
        let packed = bincode::serde::encode_to_vec(schema, bincode_config())
            .map_err(|e| DbError::Corruption(format!("failed to encode table schema: {e}")))?;
        if packed.len() > PAGE_SIZE - PAGE_HEADER_LEN {
            return Err(DbError::InvalidArgument(format!(
                "table schema for '{}' is {} bytes, which does not fit in a page",
                schema.name,
                packed.len()
            )));
        }
        let idx = cache.get_page(page_no)?;
        let body = &mut cache.frame_bytes_mut(idx)[PAGE_HEADER_LEN..];
        body[..packed.len()].copy_from_slice(&packed);
        body[packed.len()..].fill(0);
        txn.note_dirty(cache, page_no)?;
        Ok(())
    }

    fn read_schema_page(&self, cache: &mut BufferCache, page_no: u32) -> DbResult<TableSchema> {
        let idx = cache.get_page(page_no)?;
        let body = &cache.frame_bytes(idx)[PAGE_HEADER_LEN..];
        let (schema, _) = bincode::serde::decode_from_slice(body, bincode_config())
            .map_err(|e| DbError::Corruption(format!("failed to decode table schema: {e}")))?;
        Ok(schema)
    }

    /// Register a brand new table: allocates its data B+Tree and a
    /// schema page, then indexes both under the table's name hash.
    /// Fails if a table by this name already exists.
    pub fn create_table(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        name: &str,
        columns: Vec<ColumnDef>,
    ) -> DbResult<()> {
        if columns.is_empty() {
            return Err(DbError::InvalidArgument("a table needs at least one column".into()));
        }
        if columns.len() > MAX_COLUMNS {
            return Err(DbError::InvalidArgument(format!(
                "table '{name}' declares {} columns, max is {MAX_COLUMNS}",
                columns.len()
            )));
        }
        let hash_key = hash_table_name(name);
        if self.tree.search(cache, hash_key).is_ok() {
            return Err(DbError::AlreadyExists(format!("table '{name}' already exists")));
        }

        let primary_key_index = columns.iter().position(|c| c.is_primary_key);

        let data_tree = Tree::create(cache)?;
        let schema = TableSchema {
            name: name.to_string(),
            columns,
            primary_key_index,
            btree_root: data_tree.root_page(),
            next_rowid: 1,
            row_count: 0,
        };

        let schema_page = cache.pager_mut().allocate_page(PageType::Catalog)?;
        self.write_schema_page(cache, txn, schema_page, &schema)?;
        self.tree.insert(cache, txn, hash_key, schema_page)?;
        Ok(())
    }

    /// Look up a table's schema by name.
    pub fn get_table(&self, cache: &mut BufferCache, name: &str) -> DbResult<TableSchema> {
        let hash_key = hash_table_name(name);
        let schema_page = self
            .tree
            .search(cache, hash_key)
            .map_err(|_| DbError::NotFound(format!("table '{name}' does not exist")))?;
        self.read_schema_page(cache, schema_page)
    }

    /// Persist an updated schema (e.g. a new `row_count`/`next_rowid`
    /// after a write) back to its existing schema page.
    pub fn update_table(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        schema: &TableSchema,
    ) -> DbResult<()> {
        let hash_key = hash_table_name(&schema.name);
        let schema_page = self
            .tree
            .search(cache, hash_key)
            .map_err(|_| DbError::NotFound(format!("table '{}' does not exist", schema.name)))?;
        self.write_schema_page(cache, txn, schema_page, schema)
    }

    /// Drop a table: frees every page of its data B+Tree, frees its
    /// schema page, and removes its entry from the catalog tree. Nothing
    /// is left orphaned on drop.
    pub fn drop_table(
        &mut self,
        cache: &mut BufferCache,
        txn: &mut dyn DirtyTracker,
        name: &str,
    ) -> DbResult<()> {
        let hash_key = hash_table_name(name);
        let schema_page = self
            .tree
            .search(cache, hash_key)
            .map_err(|_| DbError::NotFound(format!("table '{name}' does not exist")))?;
        let schema = self.read_schema_page(cache, schema_page)?;

        self.tree.delete(cache, txn, hash_key)?;

        let data_tree = Tree::open(cache, schema.btree_root)?;
        data_tree.drain_all_pages(cache)?;
        cache.pager_mut().free_page(schema_page)?;
        Ok(())
    }

    /// Every table name currently registered, in catalog-tree key order
    /// (i.e. by hash, not alphabetically).
    pub fn list_tables(&self, cache: &mut BufferCache) -> DbResult<Vec<String>> {
        let mut names = Vec::new();
        let mut cursor = self.tree.cursor_first(cache)?;
        while self.tree.cursor_valid(&cursor) {
            let (_, schema_page) = self.tree.cursor_get(cache, &cursor)?;
            names.push(self.read_schema_page(cache, schema_page)?.name);
            self.tree.cursor_next(cache, &mut cursor)?;
        }
        Ok(names)
    }
}
