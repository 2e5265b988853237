//! Write-Back Table Store
//!
//! The shared core under both backends: a per-table read-through cache plus
//! dirty-key tracking over one backing file. The single-file backend owns one
//! of these; the sharded backend owns one per shard.
//!
//! ## Write-back discipline
//! - `set`/`set_multiple` land in RAM only and mark keys dirty
//! - `delete`/`delete_multiple` hit the backing table immediately
//! - `flush` persists every dirty key's current cached value in one
//!   transaction per table
//!
//! Invariants: every dirty key is present in the read-through cache; a
//! deleted key is purged from both.
//!
//! Callers are responsible for table-name validation and locking; methods
//! here take `&mut self` and are wrapped in a mutex one level up.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::codec::Codec;
use crate::error::Result;

use super::table::TableFile;

/// Write-back cache over one physical backing file
pub struct TableStore {
    file: TableFile,

    codec: Codec,

    /// Read-through cache: { table: { key: value } }
    cache: HashMap<String, HashMap<String, Value>>,

    /// Keys pending persistence: { table: { key } }
    dirty: HashMap<String, HashSet<String>>,

    /// File size captured at open and after each flush
    last_size: u64,
}

impl TableStore {
    /// Open or create the backing file
    pub fn open(path: &Path, codec: Codec) -> Result<Self> {
        let file = TableFile::open(path)?;
        let last_size = file.size_on_disk();
        Ok(Self {
            file,
            codec,
            cache: HashMap::new(),
            dirty: HashMap::new(),
            last_size,
        })
    }

    /// Make sure the table is tracked in RAM
    fn ensure_tracked(&mut self, table: &str) {
        self.cache.entry(table.to_string()).or_default();
        self.dirty.entry(table.to_string()).or_default();
    }

    // =========================================================================
    // Core Operations
    // =========================================================================

    /// Get a value, populating the read-through cache on a miss
    pub fn get(&mut self, table: &str, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.cache.get(table).and_then(|t| t.get(key)) {
            return Ok(Some(value.clone()));
        }

        match self.file.fetch(table, key)? {
            Some(payload) => {
                let value = self.codec.decode(payload)?;
                self.cache
                    .entry(table.to_string())
                    .or_default()
                    .insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Batch get: cache hits first, then one chunked backend query for misses
    ///
    /// Keys the backend does not hold are omitted from the result.
    pub fn get_multiple(&mut self, table: &str, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut results = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();

        let table_cache = self.cache.get(table);
        for key in keys {
            match table_cache.and_then(|t| t.get(key)) {
                Some(value) => {
                    results.insert(key.clone(), value.clone());
                }
                None => missing.push(key.clone()),
            }
        }

        if !missing.is_empty() {
            let rows = self.file.fetch_many(table, &missing)?;
            let table_cache = self.cache.entry(table.to_string()).or_default();
            for (key, payload) in rows {
                let value = self.codec.decode(payload)?;
                table_cache.insert(key.clone(), value.clone());
                results.insert(key, value);
            }
        }
        Ok(results)
    }

    /// Set a value in RAM and mark it dirty; nothing touches the backing table
    pub fn set(&mut self, table: &str, key: &str, value: Value) {
        self.cache
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.dirty
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string());
    }

    /// Batch set; same deferred semantics as `set`
    pub fn set_multiple(&mut self, table: &str, mapping: HashMap<String, Value>) {
        let dirty = self.dirty.entry(table.to_string()).or_default();
        dirty.extend(mapping.keys().cloned());
        self.cache
            .entry(table.to_string())
            .or_default()
            .extend(mapping);
    }

    /// Delete a key from RAM and, immediately, from the backing table
    pub fn delete(&mut self, table: &str, key: &str) -> Result<()> {
        self.delete_multiple(table, std::slice::from_ref(&key.to_string()))
    }

    /// Batch delete; unlike writes, deletes are never deferred
    pub fn delete_multiple(&mut self, table: &str, keys: &[String]) -> Result<()> {
        if let Some(table_cache) = self.cache.get_mut(table) {
            for key in keys {
                table_cache.remove(key);
            }
        }
        if let Some(table_dirty) = self.dirty.get_mut(table) {
            for key in keys {
                table_dirty.remove(key);
            }
        }
        self.file.remove_many(table, keys)
    }

    /// True if the key is cached or persisted, without deserializing
    pub fn check(&mut self, table: &str, key: &str) -> Result<bool> {
        if self.cache.get(table).is_some_and(|t| t.contains_key(key)) {
            return Ok(true);
        }
        self.file.exists(table, key)
    }

    /// Backend keys plus cached keys not yet flushed
    pub fn list_keys(&mut self, table: &str) -> Result<BTreeSet<String>> {
        let mut keys = self.file.keys(table)?;
        if let Some(table_cache) = self.cache.get(table) {
            keys.extend(table_cache.keys().cloned());
        }
        Ok(keys)
    }

    // =========================================================================
    // Table Lifecycle
    // =========================================================================

    /// Tables present in the backing file, registered in RAM as a side effect
    pub fn list_tables(&mut self) -> Result<Vec<String>> {
        let tables = self.file.tables()?;
        for table in &tables {
            self.ensure_tracked(table);
        }
        Ok(tables)
    }

    /// Create the backing table and its RAM tracking
    pub fn create_table(&mut self, table: &str) -> Result<()> {
        self.file.ensure_table(table)?;
        self.ensure_tracked(table);
        Ok(())
    }

    /// Wipe the table's rows and RAM state, keeping the shell
    pub fn clear_table(&mut self, table: &str) -> Result<()> {
        if let Some(table_cache) = self.cache.get_mut(table) {
            table_cache.clear();
        }
        if let Some(table_dirty) = self.dirty.get_mut(table) {
            table_dirty.clear();
        }
        self.file.clear_table(table)
    }

    /// Remove the table and all its tracking
    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        self.cache.remove(table);
        self.dirty.remove(table);
        self.file.drop_table(table)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Persist every dirty key's current cached value
    ///
    /// One transactional batch upsert per table with a non-empty dirty set;
    /// the dirty set is cleared only after its upsert commits. With
    /// `clear_cache` the read-through cache is emptied afterward as well.
    pub fn flush(&mut self, clear_cache: bool) -> Result<()> {
        let tables: Vec<String> = self
            .dirty
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(table, _)| table.clone())
            .collect();

        for table in tables {
            let keys = self
                .dirty
                .get_mut(&table)
                .map(std::mem::take)
                .unwrap_or_default();

            let empty = HashMap::new();
            let table_cache = self.cache.get(&table).unwrap_or(&empty);
            let mut rows = Vec::with_capacity(keys.len());
            for key in &keys {
                if let Some(value) = table_cache.get(key) {
                    rows.push((key.clone(), self.codec.encode(value)?));
                }
            }

            if let Err(err) = self.file.upsert_many(&table, &rows) {
                // Keep the keys dirty so a later flush can retry them
                self.dirty.entry(table).or_default().extend(keys);
                return Err(err);
            }
            debug!(table = %table, rows = rows.len(), "flushed dirty keys");
        }

        if clear_cache {
            for table_cache in self.cache.values_mut() {
                table_cache.clear();
            }
        }

        self.last_size = self.file.size_on_disk();
        Ok(())
    }

    /// Full-table scan of the persisted view
    ///
    /// Unflushed writes are not part of this view; callers wanting them must
    /// flush first.
    pub fn get_all(&mut self, table: &str) -> Result<HashMap<String, Value>> {
        let rows = self.file.scan(table)?;
        let mut all = HashMap::with_capacity(rows.len());
        for (key, payload) in rows {
            all.insert(key, self.codec.decode(payload)?);
        }
        Ok(all)
    }

    /// File size captured at the last flush (or open)
    pub fn size_estimate(&self) -> u64 {
        self.last_size
    }
}
