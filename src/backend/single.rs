//! Single-File Backend
//!
//! The simplest backend variant: one write-back table store bound to one
//! physical file, guarded by one coarse mutex held for the full duration of
//! every operation.

use std::collections::{BTreeSet, HashMap};
use std::fs;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::codec::Codec;
use crate::config::Config;
use crate::error::Result;

use super::{validate_table, Store, TableStore};

/// One table store over one storage file
pub struct SingleFile {
    default_table: String,
    inner: Mutex<TableStore>,
}

impl SingleFile {
    /// Open or create `{path}/{name}.db` and its default table
    pub fn open(config: &Config) -> Result<Self> {
        let default_table = validate_table(&config.default_table)?.to_string();
        fs::create_dir_all(&config.path)?;
        let path = config.path.join(format!("{}.db", config.name));

        let mut store = TableStore::open(&path, Codec::new(config.compression_threshold))?;
        store.create_table(&default_table)?;
        debug!(path = %path.display(), "single-file backend opened");

        Ok(Self {
            default_table,
            inner: Mutex::new(store),
        })
    }

    fn resolve<'a>(&'a self, table: Option<&'a str>) -> Result<&'a str> {
        validate_table(table.unwrap_or(&self.default_table))
    }
}

impl Store for SingleFile {
    fn get(&self, key: &str, table: Option<&str>) -> Result<Option<Value>> {
        let table = self.resolve(table)?;
        self.inner.lock().get(table, key)
    }

    fn get_multiple(
        &self,
        keys: &[String],
        table: Option<&str>,
    ) -> Result<HashMap<String, Value>> {
        let table = self.resolve(table)?;
        self.inner.lock().get_multiple(table, keys)
    }

    fn set(&self, key: &str, value: Value, table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        self.inner.lock().set(table, key, value);
        Ok(())
    }

    fn set_multiple(&self, mapping: HashMap<String, Value>, table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        self.inner.lock().set_multiple(table, mapping);
        Ok(())
    }

    fn delete(&self, key: &str, table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        self.inner.lock().delete(table, key)
    }

    fn delete_multiple(&self, keys: &[String], table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        self.inner.lock().delete_multiple(table, keys)
    }

    fn check(&self, key: &str, table: Option<&str>) -> Result<bool> {
        let table = self.resolve(table)?;
        self.inner.lock().check(table, key)
    }

    fn list_keys(&self, table: Option<&str>) -> Result<BTreeSet<String>> {
        let table = self.resolve(table)?;
        self.inner.lock().list_keys(table)
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.lock().list_tables()
    }

    fn create_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        self.inner.lock().create_table(table)
    }

    fn clear_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        self.inner.lock().clear_table(table)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        self.inner.lock().drop_table(table)
    }

    fn flush(&self, clear_cache: bool) -> Result<()> {
        self.inner.lock().flush(clear_cache)
    }

    fn close(&self) -> Result<()> {
        // The file handle is released when the store drops with the backend
        self.inner.lock().flush(false)
    }

    fn get_all(&self, table: Option<&str>) -> Result<HashMap<String, Value>> {
        let table = self.resolve(table)?;
        self.inner.lock().get_all(table)
    }
}
