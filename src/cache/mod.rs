//! RAM Cache Tier
//!
//! The top tier of the engine: a recency-ordered, TTL-aware cache sitting in
//! front of one backend, with write-back dirty tracking, deferred deletion,
//! middleware hooks, and change watchers.
//!
//! ## Responsibilities
//! - Resolve reads from RAM first, lazily loading backend rows on a miss
//! - Defer writes and deletes to an explicit `flush`
//! - Evict least-recently-used entries past the per-table key bound
//! - Expire TTL'd entries, lazily on read and actively via the sweeper
//!
//! ```text
//!   callers ──▶ Cache ──▶ resident LRU ──(miss)──▶ Backend
//!                │            │
//!                │       dirty map + pending deletions
//!                └──(flush)───▶ Backend set_multiple / delete_multiple
//! ```
//!
//! One coarse mutex guards all mutable state; every public operation holds it
//! for its full duration, and the backend is only entered with it held.
//! Middleware and watcher callbacks therefore must not call back into the
//! cache.

mod entry;
mod sweeper;

pub use entry::TtlEntry;

use entry::now_epoch;
use sweeper::Sweeper;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{validate_table, SingleFile, Store};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::shard::Sharded;

/// Transforms a value on its way into the cache; failures abort the write
pub type MiddlewareFn = Box<dyn Fn(&str, Value) -> Result<Value> + Send>;

/// Observes committed writes to a key; failures are logged and swallowed
pub type WatcherFn = Box<dyn Fn(&Value) -> Result<()> + Send>;

/// Per-table RAM state
pub(crate) struct TableCache {
    /// Recency-ordered entries, least-recently-used evicted at capacity
    pub(crate) resident: LruCache<String, TtlEntry>,

    /// Entries pending backend persistence (survive LRU eviction)
    pub(crate) dirty: HashMap<String, TtlEntry>,

    /// Keys pending backend removal
    pub(crate) deleted: HashSet<String>,
}

impl TableCache {
    fn new(max_keys: usize) -> Self {
        Self {
            resident: LruCache::new(NonZeroUsize::new(max_keys.max(1)).unwrap()),
            dirty: HashMap::new(),
            deleted: HashSet::new(),
        }
    }
}

/// Everything behind the cache tier's coarse mutex
pub(crate) struct CacheState {
    pub(crate) tables: HashMap<String, TableCache>,
    middleware: Vec<MiddlewareFn>,
    watchers: HashMap<String, Vec<WatcherFn>>,
    max_keys: usize,
}

impl CacheState {
    fn new(max_keys: usize) -> Self {
        Self {
            tables: HashMap::new(),
            middleware: Vec::new(),
            watchers: HashMap::new(),
            max_keys,
        }
    }

    /// Table slot, created lazily on first use
    pub(crate) fn table_mut(&mut self, table: &str) -> &mut TableCache {
        let max_keys = self.max_keys;
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| TableCache::new(max_keys))
    }

    /// The delete path: drop from RAM, queue the backend removal
    ///
    /// Idempotent, and applies whether or not the key currently exists.
    pub(crate) fn mark_deleted(&mut self, table: &str, key: &str) {
        let slot = self.table_mut(table);
        slot.resident.pop(key);
        slot.dirty.remove(key);
        slot.deleted.insert(key.to_string());
    }

    /// Run the middleware chain in registration order
    fn apply_middleware(&self, key: &str, mut value: Value) -> Result<Value> {
        for middleware in &self.middleware {
            value = middleware(key, value)?;
        }
        Ok(value)
    }

    /// Fire every watcher registered for the key
    fn notify(&self, key: &str, value: &Value) {
        if let Some(callbacks) = self.watchers.get(key) {
            for callback in callbacks {
                if let Err(err) = callback(value) {
                    warn!(key, error = %err, "watcher callback failed");
                }
            }
        }
    }
}

/// TTL + LRU cache tier over a single backend
pub struct Cache {
    db: Box<dyn Store>,
    state: Arc<Mutex<CacheState>>,
    sweeper: Sweeper,
    default_table: String,
    max_keys: usize,
}

impl Cache {
    /// Open the configured backend, start the sweeper, optionally preload
    pub fn open(config: Config) -> Result<Self> {
        let default_table = validate_table(&config.default_table)?.to_string();

        let db: Box<dyn Store> = match config.backend {
            BackendKind::SingleFile => Box::new(SingleFile::open(&config)?),
            BackendKind::Sharded => Box::new(Sharded::open(&config)?),
        };

        let state = Arc::new(Mutex::new(CacheState::new(config.max_keys)));
        let sweeper = Sweeper::start(Arc::clone(&state), config.sweep_interval)?;

        let cache = Self {
            db,
            state,
            sweeper,
            default_table,
            max_keys: config.max_keys,
        };
        if config.preload {
            cache.preload()?;
        }
        Ok(cache)
    }

    fn resolve<'a>(&'a self, table: Option<&'a str>) -> Result<&'a str> {
        validate_table(table.unwrap_or(&self.default_table))
    }

    // =========================================================================
    // Middleware & Watchers
    // =========================================================================

    /// Register middleware: runs on every write, in registration order
    pub fn use_middleware<F>(&self, middleware: F)
    where
        F: Fn(&str, Value) -> Result<Value> + Send + 'static,
    {
        self.state.lock().middleware.push(Box::new(middleware));
    }

    /// Register a callback fired whenever the given key is written
    pub fn watch<F>(&self, key: &str, callback: F)
    where
        F: Fn(&Value) -> Result<()> + Send + 'static,
    {
        self.state
            .lock()
            .watchers
            .entry(key.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    // =========================================================================
    // Core API
    // =========================================================================

    /// Write a value, optionally with a TTL
    ///
    /// Middleware first, then wrap, insert, un-delete, notify watchers, and
    /// evict past the key bound.
    pub fn set(
        &self,
        key: &str,
        value: Value,
        table: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let table = self.resolve(table)?;
        let mut state = self.state.lock();

        let value = state.apply_middleware(key, value)?;
        let entry = TtlEntry::new(value, ttl);

        let slot = state.table_mut(table);
        slot.resident.put(key.to_string(), entry.clone());
        slot.dirty.insert(key.to_string(), entry.clone());
        slot.deleted.remove(key);

        state.notify(key, &entry.value);
        Ok(())
    }

    /// Batch write; one expiry computed for the whole batch
    pub fn set_multiple(
        &self,
        mapping: HashMap<String, Value>,
        table: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let table = self.resolve(table)?;
        let expires_at = ttl.map(|t| now_epoch() + t.as_secs_f64());
        let mut state = self.state.lock();

        for (key, value) in mapping {
            let value = state.apply_middleware(&key, value)?;
            let entry = TtlEntry { value, expires_at };

            let slot = state.table_mut(table);
            slot.resident.put(key.clone(), entry.clone());
            slot.dirty.insert(key.clone(), entry.clone());
            slot.deleted.remove(&key);

            state.notify(&key, &entry.value);
        }
        Ok(())
    }

    /// Read a value; absent or expired keys yield `None`
    pub fn get(&self, key: &str, table: Option<&str>) -> Result<Option<Value>> {
        let table = self.resolve(table)?;
        let mut state = self.state.lock();
        self.get_locked(&mut state, table, key, now_epoch())
    }

    /// Batch read; absent and expired keys are omitted
    pub fn get_multiple(
        &self,
        keys: &[String],
        table: Option<&str>,
    ) -> Result<HashMap<String, Value>> {
        let table = self.resolve(table)?;
        let mut state = self.state.lock();
        let now = now_epoch();

        let mut results = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_locked(&mut state, table, key, now)? {
                results.insert(key.clone(), value);
            }
        }
        Ok(results)
    }

    /// The shared read path (caller holds the state lock)
    fn get_locked(
        &self,
        state: &mut CacheState,
        table: &str,
        key: &str,
        now: f64,
    ) -> Result<Option<Value>> {
        // Resident hit promotes the key's recency
        let mut entry = state.table_mut(table).resident.get(key).cloned();

        if entry.is_none() {
            // A pending deletion hides any backend copy
            if state.table_mut(table).deleted.contains(key) {
                return Ok(None);
            }
            if let Some(raw) = self.db.get(key, Some(table))? {
                let adopted = TtlEntry::from_stored(raw);
                state
                    .table_mut(table)
                    .resident
                    .put(key.to_string(), adopted.clone());
                entry = Some(adopted);
            }
        }

        match entry {
            Some(entry) if entry.is_expired(now) => {
                state.mark_deleted(table, key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    /// Delete a key; the backend removal is deferred until `flush`
    pub fn delete(&self, key: &str, table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        self.state.lock().mark_deleted(table, key);
        Ok(())
    }

    /// Batch delete; same deferred semantics as `delete`
    pub fn delete_multiple(&self, keys: &[String], table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        let mut state = self.state.lock();
        for key in keys {
            state.mark_deleted(table, key);
        }
        Ok(())
    }

    /// Existence check without loading the value into RAM
    pub fn check(&self, key: &str, table: Option<&str>) -> Result<bool> {
        let table = self.resolve(table)?;
        let mut state = self.state.lock();

        let slot = state.table_mut(table);
        if slot.deleted.contains(key) {
            return Ok(false);
        }
        if let Some(entry) = slot.resident.peek(key) {
            return Ok(!entry.is_expired(now_epoch()));
        }
        self.db.check(key, Some(table))
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Backend keys plus resident keys, minus pending deletions
    pub fn list_keys(&self, table: Option<&str>) -> Result<BTreeSet<String>> {
        let table = self.resolve(table)?;
        let mut state = self.state.lock();

        let mut keys = self.db.list_keys(Some(table))?;
        let slot = state.table_mut(table);
        keys.extend(slot.resident.iter().map(|(key, _)| key.clone()));
        for key in &slot.deleted {
            keys.remove(key);
        }
        Ok(keys)
    }

    /// Every table the backend knows about
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.db.list_tables()
    }

    /// Full view: backend rows under non-expired resident entries, minus
    /// pending deletions
    pub fn get_all(&self, table: Option<&str>) -> Result<HashMap<String, Value>> {
        let table = self.resolve(table)?;
        let mut state = self.state.lock();
        let now = now_epoch();

        let mut all = HashMap::new();
        for (key, raw) in self.db.get_all(Some(table))? {
            let entry = TtlEntry::from_stored(raw);
            if entry.is_expired(now) {
                continue;
            }
            all.insert(key, entry.value);
        }

        let slot = state.table_mut(table);
        for (key, entry) in slot.resident.iter() {
            if entry.is_expired(now) {
                continue;
            }
            all.insert(key.clone(), entry.value.clone());
        }
        for key in &slot.deleted {
            all.remove(key);
        }
        Ok(all)
    }

    // =========================================================================
    // Table Lifecycle
    // =========================================================================

    /// Create a table in the backend and its RAM slot
    pub fn create_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        let mut state = self.state.lock();
        state.table_mut(table);
        self.db.create_table(table)
    }

    /// Wipe a table in RAM and in the backend, keeping the shell
    pub fn clear_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        let mut state = self.state.lock();

        let slot = state.table_mut(table);
        slot.resident.clear();
        slot.dirty.clear();
        slot.deleted.clear();
        self.db.clear_table(table)
    }

    /// Remove a table completely
    pub fn drop_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        let mut state = self.state.lock();

        state.tables.remove(table);
        self.db.drop_table(table)
    }

    // =========================================================================
    // Persistence & Lifecycle
    // =========================================================================

    /// Push pending deletions and dirty entries to the backend, then flush it
    pub fn flush(&self) -> Result<()> {
        Self::flush_into(self.db.as_ref(), &self.state)
    }

    /// Stop the sweeper, flush, and close the backend
    pub fn close(self) -> Result<()> {
        let Self {
            db, state, sweeper, ..
        } = self;
        sweeper.stop();
        Self::flush_into(db.as_ref(), &state)?;
        db.close()
    }

    fn flush_into(db: &dyn Store, state: &Mutex<CacheState>) -> Result<()> {
        let mut state = state.lock();
        for (table, slot) in state.tables.iter_mut() {
            if !slot.deleted.is_empty() {
                let keys: Vec<String> = slot.deleted.iter().cloned().collect();
                db.delete_multiple(&keys, Some(table))?;
                slot.deleted.clear();
            }
            if !slot.dirty.is_empty() {
                let mapping: HashMap<String, Value> = slot
                    .dirty
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.to_stored()))
                    .collect();
                db.set_multiple(mapping, Some(table))?;
                slot.dirty.clear();
            }
        }
        db.flush(false)
    }

    /// Warm the resident maps from the backend, up to `max_keys` per table
    fn preload(&self) -> Result<()> {
        for table in self.db.list_tables()? {
            let keys: Vec<String> = self
                .db
                .list_keys(Some(&table))?
                .into_iter()
                .take(self.max_keys)
                .collect();
            if keys.is_empty() {
                continue;
            }
            let loaded = self.db.get_multiple(&keys, Some(&table))?;
            let count = loaded.len();

            let mut state = self.state.lock();
            let slot = state.table_mut(&table);
            for (key, raw) in loaded {
                slot.resident.put(key, TtlEntry::from_stored(raw));
            }
            debug!(table = %table, count, "preloaded table into RAM");
        }
        Ok(())
    }
}
