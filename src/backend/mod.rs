//! Backend Module
//!
//! The durable half of the engine: the capability set both backend variants
//! implement, the write-back table store they share, and the thin wrapper
//! around the physical backing tables.
//!
//! ## Layout
//! - `table`: the only module that issues statements against the storage
//!   medium
//! - `store`: write-back cache + dirty tracking over one backing file
//! - `single`: the single-file backend variant
//!
//! The sharded variant lives in the `shard` module and reuses `store` for
//! each of its shards.

mod single;
mod store;
mod table;

pub use single::SingleFile;
pub use store::TableStore;
pub use table::{TableFile, MAX_BATCH_PARAMS};

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::error::{Result, StrataError};

/// The capability set shared by every backend variant
///
/// `table` is `None` for the configured default table. Absent keys yield
/// `None` or are omitted from batch results; they are never errors.
pub trait Store: Send + Sync {
    /// Get one value
    fn get(&self, key: &str, table: Option<&str>) -> Result<Option<Value>>;

    /// Get many values; missing keys are omitted
    fn get_multiple(&self, keys: &[String], table: Option<&str>)
        -> Result<HashMap<String, Value>>;

    /// Set one value (deferred until `flush`)
    fn set(&self, key: &str, value: Value, table: Option<&str>) -> Result<()>;

    /// Set many values (deferred until `flush`)
    fn set_multiple(&self, mapping: HashMap<String, Value>, table: Option<&str>) -> Result<()>;

    /// Delete one key (immediate)
    fn delete(&self, key: &str, table: Option<&str>) -> Result<()>;

    /// Delete many keys (immediate)
    fn delete_multiple(&self, keys: &[String], table: Option<&str>) -> Result<()>;

    /// Existence check without loading the value
    fn check(&self, key: &str, table: Option<&str>) -> Result<bool>;

    /// Every key the table holds, persisted or pending
    fn list_keys(&self, table: Option<&str>) -> Result<BTreeSet<String>>;

    /// Every known table
    fn list_tables(&self) -> Result<Vec<String>>;

    /// Create a table (idempotent)
    fn create_table(&self, table: &str) -> Result<()>;

    /// Wipe a table's contents, keeping the table itself
    fn clear_table(&self, table: &str) -> Result<()>;

    /// Remove a table entirely
    fn drop_table(&self, table: &str) -> Result<()>;

    /// Persist all dirty keys; optionally empty the read-through caches
    fn flush(&self, clear_cache: bool) -> Result<()>;

    /// Flush and release; required for durability of dirty data
    fn close(&self) -> Result<()>;

    /// The table's full persisted view
    fn get_all(&self, table: Option<&str>) -> Result<HashMap<String, Value>>;
}

/// Validate a table name before any I/O happens
///
/// Accepts `[A-Za-z0-9_]+` and nothing else; names are interpolated into
/// statements downstream, so this is the security boundary.
pub fn validate_table(name: &str) -> Result<&str> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        Ok(name)
    } else {
        Err(StrataError::InvalidTableName(name.to_string()))
    }
}
