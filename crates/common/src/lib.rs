#[cfg(test)]
mod tests;

pub mod le;

use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;

/// Page number within a database file. Page 0 is always the file header.
pub type PageNo = u32;

/// Monotonic transaction identifier. `0` means "untagged" everywhere a
/// cache frame or WAL record carries a `txn_id`.
pub type TxnId = u64;

/// Canonical error type shared across the storage, buffer, B+Tree, WAL,
/// transaction, catalog and executor crates.
///
/// Each variant corresponds to one failure kind in the engine's error
/// taxonomy; callers match on these rather than parsing message text.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("busy: {0}")]
    Busy(String),
    #[error("full: {0}")]
    Full(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("arithmetic overflow: {0}")]
    Overflow(String),
    #[error("no more rows")]
    Done,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the storage engine.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .page_size(4096)
///     .buffer_pool_pages(256)
///     .wal_enabled(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory that holds the single database file and any temp files.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Fixed page size in bytes. The engine is built around exactly 4096;
    /// this field exists so callers can assert it rather than hardcode it.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Number of frames the buffer cache keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Controls whether the write-ahead log participates in commits.
    /// Disabling it is only meant for throwaway/test databases.
    #[builder(default = true)]
    pub wal_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            page_size: 4096,
            buffer_pool_pages: 256,
            wal_enabled: true,
        }
    }
}

/// Convenient re-exports for downstream crates.
///
/// `types::{SqlType, Value}` are deliberately not re-exported here:
/// `types` itself depends on `common` (for the row codec's error type and
/// little-endian helpers), so folding it back into this prelude would
/// make the two crates depend on each other.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, PageNo, TxnId};
}
