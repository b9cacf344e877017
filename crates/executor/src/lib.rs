//! Statement execution: turns a table name, a row or predicate, and a
//! catalog/buffer-cache pair into page-level B+Tree and row-codec
//! operations.
//!
//! Each table's rows live one-per-page in a dedicated data B+Tree keyed by
//! either the declared `PRIMARY KEY` column or, absent one, an
//! auto-incrementing rowid the catalog hands out. A `WHERE` clause is a
//! single column/operator/constant [`Predicate`]; an equality predicate on
//! the primary key goes straight to [`btree::Tree::search`] instead of
//! scanning.


use btree::Tree;
use buffer::{BufferCache, DirtyTracker};
use catalog::{Catalog, ColumnDef, TableSchema};
use common::{DbError, DbResult};
use storage::{PageType, PAGE_HEADER_LEN};
use types::{row, SqlType, Value};

/// Comparison operator for a [`Predicate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    fn matches(self, lhs: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            ComparisonOp::Eq => lhs == Equal,
            ComparisonOp::Ne => lhs != Equal,
            ComparisonOp::Lt => lhs == Less,
            ComparisonOp::Le => lhs != Greater,
            ComparisonOp::Gt => lhs == Greater,
            ComparisonOp::Ge => lhs != Less,
        }
    }
}

/// A single `WHERE column OP value` condition. This engine has no
/// conjunctions or disjunctions: one predicate per statement, same as the
/// system it is ported from.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: ComparisonOp,
    pub value: Value,
}

fn column_index(schema: &TableSchema, name: &str) -> DbResult<usize> {
    schema
        .column_index(name)
        .ok_or_else(|| DbError::NotFound(format!("column '{name}' not found in table '{}'", schema.name)))
}

fn check_row_shape(schema: &TableSchema, values: &[Value]) -> DbResult<()> {
    if values.len() != schema.columns.len() {
        return Err(DbError::InvalidArgument(format!(
            "table '{}' has {} columns, {} values given",
            schema.name,
            schema.columns.len(),
            values.len()
        )));
    }
    for (col, val) in schema.columns.iter().zip(values) {
        if val.is_null() {
            if col.not_null {
                return Err(DbError::InvalidArgument(format!("column '{}' is NOT NULL", col.name)));
            }
            continue;
        }
        let ok = match (col.sql_type, val) {
            (SqlType::Integer, Value::Integer(_)) => true,
            (SqlType::Text, Value::Text(_)) => true,
            (SqlType::Blob, Value::Blob(_)) => true,
            _ => false,
        };
        if !ok {
            return Err(DbError::InvalidArgument(format!(
                "column '{}' expects {:?}, got a mismatched value",
                col.name, col.sql_type
            )));
        }
    }
    Ok(())
}

fn primary_key_column(schema: &TableSchema) -> Option<(&ColumnDef, usize)> {
    schema.primary_key_index.map(|idx| (&schema.columns[idx], idx))
}

fn write_row_page(cache: &mut BufferCache, txn: &mut dyn DirtyTracker, values: &[Value]) -> DbResult<u32> {
    let needed = row::serialized_size(values);
    if needed > storage::PAGE_SIZE - PAGE_HEADER_LEN {
        return Err(DbError::InvalidArgument(format!(
            "row is {needed} bytes, which does not fit in a page"
        )));
    }
    let page_no = cache.pager_mut().allocate_page(PageType::Data)?;
    let idx = cache.get_page(page_no)?;
    let body = &mut cache.frame_bytes_mut(idx)[PAGE_HEADER_LEN..];
    let written = row::encode(values, body)?;
    body[written..].fill(0);
    txn.note_dirty(cache, page_no)?;
    Ok(page_no)
}

fn read_row_page(cache: &mut BufferCache, page_no: u32) -> DbResult<Vec<Value>> {
    let idx = cache.get_page(page_no)?;
    let body = &cache.frame_bytes(idx)[PAGE_HEADER_LEN..];
    row::decode(body)
}

fn overwrite_row_page(
    cache: &mut BufferCache,
    txn: &mut dyn DirtyTracker,
    page_no: u32,
    values: &[Value],
) -> DbResult<()> {
    let needed = row::serialized_size(values);
    if needed > storage::PAGE_SIZE - PAGE_HEADER_LEN {
        return Err(DbError::InvalidArgument(format!(
            "row is {needed} bytes, which does not fit in a page"
        )));
    }
    let idx = cache.get_page(page_no)?;
    let body = &mut cache.frame_bytes_mut(idx)[PAGE_HEADER_LEN..];
    let written = row::encode(values, body)?;
    body[written..].fill(0);
    txn.note_dirty(cache, page_no)?;
    Ok(())
}

/// PK-equality fast path: if the predicate is `pk_column = <integer>`,
/// returns the direct B+Tree key to search for instead of scanning.
fn pk_fast_path_key(schema: &TableSchema, predicate: Option<&Predicate>) -> Option<i32> {
    let predicate = predicate?;
    if predicate.op != ComparisonOp::Eq {
        return None;
    }
    let (pk_col, _) = primary_key_column(schema)?;
    if pk_col.name != predicate.column {
        return None;
    }
    predicate.value.as_integer()
}

fn predicate_matches(schema: &TableSchema, values: &[Value], predicate: &Predicate) -> DbResult<bool> {
    let idx = column_index(schema, &predicate.column)?;
    Ok(match values[idx].cmp_same_type(&predicate.value) {
        Some(ord) => predicate.op.matches(ord),
        None => false,
    })
}

/// Register a new table. See [`catalog::Catalog::create_table`].
pub fn create_table(
    cache: &mut BufferCache,
    txn: &mut dyn DirtyTracker,
    catalog: &mut Catalog,
    name: &str,
    columns: Vec<ColumnDef>,
) -> DbResult<()> {
    catalog.create_table(cache, txn, name, columns)
}

/// Drop a table and every page backing it. See [`catalog::Catalog::drop_table`].
pub fn drop_table(cache: &mut BufferCache, txn: &mut dyn DirtyTracker, catalog: &mut Catalog, name: &str) -> DbResult<()> {
    catalog.drop_table(cache, txn, name)
}

/// Insert one row. `values` must list every declared column in order,
/// including the primary key column if the table has one. Rejects a
/// duplicate primary key explicitly, since the underlying B+Tree itself
/// upserts rather than refusing an existing key.
pub fn insert(
    cache: &mut BufferCache,
    txn: &mut dyn DirtyTracker,
    catalog: &mut Catalog,
    table: &str,
    values: Vec<Value>,
) -> DbResult<()> {
    let mut schema = catalog.get_table(cache, table)?;
    check_row_shape(&schema, &values)?;

    let key = match primary_key_column(&schema) {
        Some((pk_col, pk_idx)) => match &values[pk_idx] {
            Value::Integer(i) => *i,
            _ => {
                return Err(DbError::InvalidArgument(format!(
                    "primary key column '{}' must be an INTEGER",
                    pk_col.name
                )))
            }
        },
        None => schema.next_rowid as i32,
    };

    let mut tree = Tree::open(cache, schema.btree_root)?;
    if tree.search(cache, key).is_ok() {
        return Err(DbError::AlreadyExists(format!(
            "row with key {key} already exists in table '{table}'"
        )));
    }

    let row_page = write_row_page(cache, txn, &values)?;
    tree.insert(cache, txn, key, row_page)?;

    schema.btree_root = tree.root_page();
    if schema.primary_key_index.is_none() {
        schema.next_rowid += 1;
    }
    schema.row_count += 1;
    catalog.update_table(cache, txn, &schema)
}

/// Fetch every row matching `predicate`, or every row if `predicate` is
/// `None`. Column order in each returned row matches the schema.
pub fn select(
    cache: &mut BufferCache,
    catalog: &Catalog,
    table: &str,
    predicate: Option<&Predicate>,
) -> DbResult<Vec<Vec<Value>>> {
    let schema = catalog.get_table(cache, table)?;
    let tree = Tree::open(cache, schema.btree_root)?;

    if let Some(key) = pk_fast_path_key(&schema, predicate) {
        return match tree.search(cache, key) {
            Ok(row_page) => Ok(vec![read_row_page(cache, row_page)?]),
            Err(DbError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
    }

    let mut rows = Vec::new();
    let mut cursor = tree.cursor_first(cache)?;
    while tree.cursor_valid(&cursor) {
        let (_, row_page) = tree.cursor_get(cache, &cursor)?;
        let values = read_row_page(cache, row_page)?;
        let keep = match predicate {
            Some(p) => predicate_matches(&schema, &values, p)?,
            None => true,
        };
        if keep {
            rows.push(values);
        }
        tree.cursor_next(cache, &mut cursor)?;
    }
    Ok(rows)
}

/// Overwrite a single column on every row matching `predicate` (or every
/// row if `None`) and returns the number of rows touched. Updating the
/// primary key column itself is rejected: changing a row's key would mean
/// re-keying its B+Tree entry, not just rewriting its page in place.
pub fn update(
    cache: &mut BufferCache,
    txn: &mut dyn DirtyTracker,
    catalog: &mut Catalog,
    table: &str,
    column: &str,
    new_value: Value,
    predicate: Option<&Predicate>,
) -> DbResult<u32> {
    let schema = catalog.get_table(cache, table)?;
    let col_idx = column_index(&schema, column)?;
    if schema.primary_key_index == Some(col_idx) {
        return Err(DbError::InvalidArgument(format!("cannot update primary key column '{column}'")));
    }
    if !new_value.is_null() {
        let ok = match (schema.columns[col_idx].sql_type, &new_value) {
            (SqlType::Integer, Value::Integer(_)) => true,
            (SqlType::Text, Value::Text(_)) => true,
            (SqlType::Blob, Value::Blob(_)) => true,
            _ => false,
        };
        if !ok {
            return Err(DbError::InvalidArgument(format!(
                "column '{column}' expects {:?}, got a mismatched value",
                schema.columns[col_idx].sql_type
            )));
        }
    }

    let tree = Tree::open(cache, schema.btree_root)?;
    let mut touched = 0u32;

    if let Some(key) = pk_fast_path_key(&schema, predicate) {
        if let Ok(row_page) = tree.search(cache, key) {
            let mut values = read_row_page(cache, row_page)?;
            values[col_idx] = new_value;
            overwrite_row_page(cache, txn, row_page, &values)?;
            touched = 1;
        }
        return Ok(touched);
    }

    let mut cursor = tree.cursor_first(cache)?;
    while tree.cursor_valid(&cursor) {
        let (_, row_page) = tree.cursor_get(cache, &cursor)?;
        let mut values = read_row_page(cache, row_page)?;
        let keep = match predicate {
            Some(p) => predicate_matches(&schema, &values, p)?,
            None => true,
        };
        if keep {
            values[col_idx] = new_value.clone();
            overwrite_row_page(cache, txn, row_page, &values)?;
            touched += 1;
        }
        tree.cursor_next(cache, &mut cursor)?;
    }
    Ok(touched)
}

/// Delete every row matching `predicate` (or every row if `None`) and
/// returns the number of rows removed, freeing each deleted row's page.
pub fn delete(
    cache: &mut BufferCache,
    txn: &mut dyn DirtyTracker,
    catalog: &mut Catalog,
    table: &str,
    predicate: Option<&Predicate>,
) -> DbResult<u32> {
    let mut schema = catalog.get_table(cache, table)?;
    let mut tree = Tree::open(cache, schema.btree_root)?;
    let mut removed = 0u32;

    if let Some(key) = pk_fast_path_key(&schema, predicate) {
        if let Ok(row_page) = tree.search(cache, key) {
            tree.delete(cache, txn, key)?;
            cache.pager_mut().free_page(row_page)?;
            removed = 1;
        }
        schema.btree_root = tree.root_page();
        schema.row_count = schema.row_count.saturating_sub(removed);
        catalog.update_table(cache, txn, &schema)?;
        return Ok(removed);
    }

    // Collect keys and pages up front: the tree's iteration order is not
    // guaranteed stable across a delete that triggers a merge or borrow
    // mid-scan.
    let mut doomed = Vec::new();
    let mut cursor = tree.cursor_first(cache)?;
    while tree.cursor_valid(&cursor) {
        let (key, row_page) = tree.cursor_get(cache, &cursor)?;
        let values = read_row_page(cache, row_page)?;
        let hit = match predicate {
            Some(p) => predicate_matches(&schema, &values, p)?,
            None => true,
        };
        if hit {
            doomed.push((key, row_page));
        }
        tree.cursor_next(cache, &mut cursor)?;
    }

    for (key, row_page) in doomed {
        tree.delete(cache, txn, key)?;
        cache.pager_mut().free_page(row_page)?;
        removed += 1;
    }

    schema.btree_root = tree.root_page();
    schema.row_count = schema.row_count.saturating_sub(removed);
    catalog.update_table(cache, txn, &schema)?;
    Ok(removed)
}
