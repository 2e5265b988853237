//! Sharded Backend
//!
//! The backend variant that spreads (table, key) pairs over many storage
//! files. Routing decisions go through the `ShardRouter`; data goes through
//! each shard's own write-back table store.
//!
//! ## Concurrency Model
//! - The crate `RwLock` separates traffic into phases: lookups take the read
//!   side, shard assignment and index mutation take the write side
//! - The shard pool map and each shard have their own mutexes, acquired in
//!   that order and never across each other
//!
//! ## Rotation
//! Size is a soft bound: shard sizes refresh only at flush time, so a burst
//! of writes can overshoot the threshold before rotation takes effect.
//! Rotation never relocates existing keys.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::backend::{validate_table, Store};
use crate::codec::Codec;
use crate::config::Config;
use crate::error::Result;
use crate::sync::RwLock;

use super::{Shard, ShardRouter};

/// Many shard files behind a routing index
pub struct Sharded {
    root: PathBuf,
    default_table: String,
    max_shard_size: u64,
    codec: Codec,

    /// Phase lock: reads shared, rotation and index mutation exclusive
    lock: RwLock,

    router: ShardRouter,

    /// Lazily-opened shards, kept open for the life of the backend
    pool: Mutex<HashMap<u64, Arc<Shard>>>,
}

impl Sharded {
    /// Open or create the sharded backend under the storage root
    pub fn open(config: &Config) -> Result<Self> {
        let default_table = validate_table(&config.default_table)?.to_string();
        fs::create_dir_all(&config.path)?;
        let router = ShardRouter::open(&config.path)?;
        debug!(path = %config.path.display(), "sharded backend opened");

        Ok(Self {
            root: config.path.clone(),
            default_table,
            max_shard_size: config.max_shard_size,
            codec: Codec::new(config.compression_threshold),
            lock: RwLock::new(),
            router,
            pool: Mutex::new(HashMap::new()),
        })
    }

    fn resolve<'a>(&'a self, table: Option<&'a str>) -> Result<&'a str> {
        validate_table(table.unwrap_or(&self.default_table))
    }

    /// Fetch a shard from the pool, opening its file on first use
    fn shard(&self, id: u64) -> Result<Arc<Shard>> {
        let mut pool = self.pool.lock();
        if let Some(shard) = pool.get(&id) {
            return Ok(Arc::clone(shard));
        }
        let shard = Arc::new(Shard::open(&self.root, id, self.codec.clone())?);
        pool.insert(id, Arc::clone(&shard));
        Ok(shard)
    }

    /// Pick the shard for a new key, rotating the active shard if it has
    /// outgrown the size bound (caller holds the write lock)
    fn assign_shard(&self) -> Result<u64> {
        let active = self.router.active_shard();
        if self.shard(active)?.size_estimate() > self.max_shard_size {
            let next = self.router.advance_active();
            debug!(from = active, to = next, "rotated active shard");
            return Ok(next);
        }
        Ok(active)
    }

    /// Group keys by their owning shard; unrouted keys are skipped
    fn group_by_shard(&self, table: &str, keys: &[String]) -> Result<HashMap<u64, Vec<String>>> {
        let mut groups: HashMap<u64, Vec<String>> = HashMap::new();
        for key in keys {
            if let Some(shard_id) = self.router.lookup(table, key)? {
                groups.entry(shard_id).or_default().push(key.clone());
            }
        }
        Ok(groups)
    }
}

impl Store for Sharded {
    fn get(&self, key: &str, table: Option<&str>) -> Result<Option<Value>> {
        let table = self.resolve(table)?;
        let _guard = self.lock.read();

        let Some(shard_id) = self.router.lookup(table, key)? else {
            return Ok(None);
        };
        let shard = self.shard(shard_id)?;
        let value = shard.store().get(table, key)?;
        Ok(value)
    }

    fn get_multiple(
        &self,
        keys: &[String],
        table: Option<&str>,
    ) -> Result<HashMap<String, Value>> {
        let table = self.resolve(table)?;
        let _guard = self.lock.read();

        let mut results = HashMap::with_capacity(keys.len());
        for (shard_id, shard_keys) in self.group_by_shard(table, keys)? {
            let shard = self.shard(shard_id)?;
            let fetched = shard.store().get_multiple(table, &shard_keys)?;
            results.extend(fetched);
        }
        Ok(results)
    }

    fn set(&self, key: &str, value: Value, table: Option<&str>) -> Result<()> {
        self.set_multiple(HashMap::from([(key.to_string(), value)]), table)
    }

    fn set_multiple(&self, mapping: HashMap<String, Value>, table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        let _guard = self.lock.write();

        // Step 1: Resolve or assign a shard for every key
        let mut groups: HashMap<u64, HashMap<String, Value>> = HashMap::new();
        let mut new_rows: Vec<(String, String, u64)> = Vec::new();
        for (key, value) in mapping {
            let shard_id = match self.router.lookup(table, &key)? {
                Some(shard_id) => shard_id,
                None => {
                    let assigned = self.assign_shard()?;
                    new_rows.push((table.to_string(), key.clone(), assigned));
                    assigned
                }
            };
            groups.entry(shard_id).or_default().insert(key, value);
        }

        // Step 2: Persist the new index rows in one batch transaction
        self.router.record(&new_rows)?;

        // Step 3: Hand each shard its sub-mapping (deferred persistence)
        for (shard_id, sub_mapping) in groups {
            let shard = self.shard(shard_id)?;
            shard.store().set_multiple(table, sub_mapping);
        }
        Ok(())
    }

    fn delete(&self, key: &str, table: Option<&str>) -> Result<()> {
        self.delete_multiple(std::slice::from_ref(&key.to_string()), table)
    }

    fn delete_multiple(&self, keys: &[String], table: Option<&str>) -> Result<()> {
        let table = self.resolve(table)?;
        let _guard = self.lock.write();

        for (shard_id, shard_keys) in self.group_by_shard(table, keys)? {
            let shard = self.shard(shard_id)?;
            shard.store().delete_multiple(table, &shard_keys)?;
        }
        self.router.forget(table, keys)
    }

    fn check(&self, key: &str, table: Option<&str>) -> Result<bool> {
        let table = self.resolve(table)?;
        let _guard = self.lock.read();

        // The index owns every live key, routed writes included
        Ok(self.router.lookup(table, key)?.is_some())
    }

    fn list_keys(&self, table: Option<&str>) -> Result<BTreeSet<String>> {
        let table = self.resolve(table)?;
        let _guard = self.lock.read();
        self.router.keys(table)
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read();
        self.router.tables()
    }

    fn create_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        let _guard = self.lock.write();

        // Make sure at least the active shard exists, then create everywhere
        self.shard(self.router.active_shard())?;
        let pool = self.pool.lock();
        for shard in pool.values() {
            shard.store().create_table(table)?;
        }
        Ok(())
    }

    fn clear_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        let _guard = self.lock.write();

        self.router.forget_table(table)?;
        let pool = self.pool.lock();
        for shard in pool.values() {
            shard.store().clear_table(table)?;
        }
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let table = validate_table(table)?;
        let _guard = self.lock.write();

        self.router.forget_table(table)?;
        let pool = self.pool.lock();
        for shard in pool.values() {
            shard.store().drop_table(table)?;
        }
        Ok(())
    }

    fn flush(&self, clear_cache: bool) -> Result<()> {
        let _guard = self.lock.write();

        let pool = self.pool.lock();
        for shard in pool.values() {
            shard.store().flush(clear_cache)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        // Shard files are released when the pool drops with the backend
        self.flush(false)
    }

    fn get_all(&self, table: Option<&str>) -> Result<HashMap<String, Value>> {
        let table = self.resolve(table)?;
        let _guard = self.lock.read();

        // Enumerate shard files on disk, not just the open pool; shards
        // written by a previous run may not be loaded yet
        let mut ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            if let Some(id) = Shard::parse_id(&entry?.path()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut combined = HashMap::new();
        for id in ids {
            let shard = self.shard(id)?;
            let rows = shard.store().get_all(table)?;
            combined.extend(rows);
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_temp_backend() -> (TempDir, Sharded) {
        let temp_dir = TempDir::new().unwrap();
        let backend = Sharded::open(&Config::builder().path(temp_dir.path()).build()).unwrap();
        (temp_dir, backend)
    }

    /// Tiny size bound so every flush pushes the active shard over it
    fn setup_rotating_backend() -> (TempDir, Sharded) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::builder()
            .path(temp_dir.path())
            .max_shard_size(1)
            .build();
        let backend = Sharded::open(&config).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_set_then_get() {
        let (_temp, backend) = setup_temp_backend();

        backend.set("k", json!({"n": 1}), None).unwrap();
        assert_eq!(backend.get("k", None).unwrap(), Some(json!({"n": 1})));
    }

    #[test]
    fn test_unrouted_key_reads_as_absent() {
        let (_temp, backend) = setup_temp_backend();

        assert_eq!(backend.get("ghost", None).unwrap(), None);
        assert!(!backend.check("ghost", None).unwrap());
    }

    #[test]
    fn test_rotation_assigns_strictly_greater_ids() {
        let (_temp, backend) = setup_rotating_backend();

        backend.set("first", json!(1), None).unwrap();
        let first_shard = {
            let _guard = backend.lock.read();
            backend.router.lookup("storage", "first").unwrap().unwrap()
        };

        // Flush refreshes the size estimate past the 1-byte bound
        backend.flush(false).unwrap();
        backend.set("second", json!(2), None).unwrap();
        let second_shard = {
            let _guard = backend.lock.read();
            backend.router.lookup("storage", "second").unwrap().unwrap()
        };

        assert!(second_shard > first_shard);
    }

    #[test]
    fn test_rotation_never_relocates_existing_keys() {
        let (_temp, backend) = setup_rotating_backend();

        backend.set("pinned", json!("v1"), None).unwrap();
        let before = {
            let _guard = backend.lock.read();
            backend.router.lookup("storage", "pinned").unwrap().unwrap()
        };

        // Force rotations with fresh keys, rewriting the pinned key between
        for i in 0..3 {
            backend.flush(false).unwrap();
            backend.set(&format!("filler{i}"), json!(i), None).unwrap();
            backend.set("pinned", json!(format!("v{i}")), None).unwrap();
        }

        let after = {
            let _guard = backend.lock.read();
            backend.router.lookup("storage", "pinned").unwrap().unwrap()
        };
        assert_eq!(before, after);
        assert_eq!(backend.get("pinned", None).unwrap(), Some(json!("v2")));
    }

    #[test]
    fn test_batch_set_groups_by_shard() {
        let (_temp, backend) = setup_rotating_backend();

        backend.set("old", json!("old"), None).unwrap();
        backend.flush(false).unwrap();

        // Mixed batch: one existing key, two new ones landing on a new shard
        let mapping = HashMap::from([
            ("old".to_string(), json!("updated")),
            ("new1".to_string(), json!(1)),
            ("new2".to_string(), json!(2)),
        ]);
        backend.set_multiple(mapping, None).unwrap();

        assert_eq!(backend.get("old", None).unwrap(), Some(json!("updated")));
        assert_eq!(backend.get("new1", None).unwrap(), Some(json!(1)));
        assert_eq!(backend.get("new2", None).unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_delete_removes_routing_and_data() {
        let (_temp, backend) = setup_temp_backend();

        backend.set("k", json!("v"), None).unwrap();
        backend.delete("k", None).unwrap();

        assert_eq!(backend.get("k", None).unwrap(), None);
        assert!(!backend.check("k", None).unwrap());
        assert!(backend.list_keys(None).unwrap().is_empty());
    }

    #[test]
    fn test_get_all_spans_unopened_shards() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::builder()
            .path(temp_dir.path())
            .max_shard_size(1)
            .build();

        {
            let backend = Sharded::open(&config).unwrap();
            backend.set("a", json!(1), None).unwrap();
            backend.flush(false).unwrap();
            backend.set("b", json!(2), None).unwrap();
            backend.close().unwrap();
        }

        // Fresh process: no shard is open until get_all walks the files
        let backend = Sharded::open(&config).unwrap();
        let all = backend.get_all(None).unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], json!(1));
        assert_eq!(all["b"], json!(2));
    }

    #[test]
    fn test_reopen_preserves_placements() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::builder()
            .path(temp_dir.path())
            .max_shard_size(1)
            .build();

        let placements: Vec<(String, u64)>;
        {
            let backend = Sharded::open(&config).unwrap();
            for i in 0..4 {
                backend.set(&format!("k{i}"), json!(i), None).unwrap();
                backend.flush(false).unwrap();
            }
            placements = (0..4)
                .map(|i| {
                    let key = format!("k{i}");
                    let _guard = backend.lock.read();
                    let shard = backend.router.lookup("storage", &key).unwrap().unwrap();
                    (key, shard)
                })
                .collect();
            backend.close().unwrap();
        }

        let backend = Sharded::open(&config).unwrap();
        for (key, shard) in placements {
            let _guard = backend.lock.read();
            assert_eq!(backend.router.lookup("storage", &key).unwrap(), Some(shard));
        }
    }

    #[test]
    fn test_clear_table_wipes_every_shard() {
        let (_temp, backend) = setup_rotating_backend();

        for i in 0..3 {
            backend.set(&format!("k{i}"), json!(i), None).unwrap();
            backend.flush(false).unwrap();
        }
        backend.clear_table("storage").unwrap();

        assert!(backend.list_keys(None).unwrap().is_empty());
        assert!(backend.get_all(None).unwrap().is_empty());
    }

    #[test]
    fn test_table_validation_guards_every_entry_point() {
        let (_temp, backend) = setup_temp_backend();

        assert!(backend.get("k", Some("bad name")).is_err());
        assert!(backend.set("k", json!(1), Some("bad;")).is_err());
        assert!(backend.delete("k", Some("-")).is_err());
        assert!(backend.drop_table("x y").is_err());
    }
}
