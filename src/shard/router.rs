//! Shard Router
//!
//! Owns the master index, the durable, authoritative mapping from
//! (table, key) to shard id, plus a bounded memo over recent lookups and the
//! monotonic active-shard counter.
//!
//! ## Memo discipline
//! The memo is strictly a read-through accelerator: any index mutation clears
//! it entirely. Finer invalidation would have to prove it never misses a
//! concurrent rotation, so the coarse policy stays.

use std::collections::BTreeSet;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::Result;

/// Bounded capacity of the lookup memo
const MEMO_CAPACITY: usize = 10_000;

/// File name of the master index under the storage root
const INDEX_FILE: &str = "master_index.db";

/// Durable (table, key) → shard id routing
pub struct ShardRouter {
    /// Master index connection; statements are serialized by this mutex
    index: Mutex<Connection>,

    /// Memoized lookups, negative results included
    memo: Mutex<LruCache<(String, String), Option<u64>>>,

    /// Shard id new keys are assigned to (monotonic, lock-free)
    active: AtomicU64,
}

impl ShardRouter {
    /// Open or create the master index and restore the active shard id
    ///
    /// The active id resumes at the highest id the index has recorded, or 0
    /// for a fresh index.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let conn = Connection::open(root.join(INDEX_FILE))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS idx (
                table_name TEXT NOT NULL,
                key        TEXT NOT NULL,
                shard_id   INTEGER NOT NULL,
                PRIMARY KEY (table_name, key)
            )",
        )?;

        let active = conn
            .query_row("SELECT MAX(shard_id) FROM idx", [], |row| {
                row.get::<_, Option<u64>>(0)
            })?
            .unwrap_or(0);
        debug!(active, "shard router opened");

        Ok(Self {
            index: Mutex::new(conn),
            memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(MEMO_CAPACITY).unwrap(),
            )),
            active: AtomicU64::new(active),
        })
    }

    /// The shard id currently receiving new keys
    pub fn active_shard(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Advance to the next shard id and return it; ids never decrease
    pub fn advance_active(&self) -> u64 {
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Resolve the owning shard of a (table, key), memoizing the answer
    pub fn lookup(&self, table: &str, key: &str) -> Result<Option<u64>> {
        let memo_key = (table.to_string(), key.to_string());
        if let Some(hit) = self.memo.lock().get(&memo_key) {
            return Ok(*hit);
        }

        let found = self
            .index
            .lock()
            .query_row(
                "SELECT shard_id FROM idx WHERE table_name = ?1 AND key = ?2",
                params![table, key],
                |row| row.get::<_, u64>(0),
            )
            .optional()?;

        self.memo.lock().put(memo_key, found);
        Ok(found)
    }

    /// Record new (table, key, shard) assignments in one transaction
    pub fn record(&self, rows: &[(String, String, u64)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.index.lock();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO idx (table_name, key, shard_id) VALUES (?1, ?2, ?3)",
                )?;
                for (table, key, shard) in rows {
                    stmt.execute(params![table, key, shard])?;
                }
            }
            tx.commit()?;
        }
        self.invalidate_memo();
        Ok(())
    }

    /// Remove routing entries for the given keys
    pub fn forget(&self, table: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.index.lock();
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM idx WHERE table_name = ?1 AND key = ?2")?;
                for key in keys {
                    stmt.execute(params![table, key])?;
                }
            }
            tx.commit()?;
        }
        self.invalidate_memo();
        Ok(())
    }

    /// Remove every routing entry of a table
    pub fn forget_table(&self, table: &str) -> Result<()> {
        self.index
            .lock()
            .execute("DELETE FROM idx WHERE table_name = ?1", params![table])?;
        self.invalidate_memo();
        Ok(())
    }

    /// All routed keys of a table
    pub fn keys(&self, table: &str) -> Result<BTreeSet<String>> {
        let conn = self.index.lock();
        let mut stmt = conn.prepare("SELECT key FROM idx WHERE table_name = ?1")?;
        let rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;
        let mut keys = BTreeSet::new();
        for row in rows {
            keys.insert(row?);
        }
        Ok(keys)
    }

    /// All tables with at least one routed key
    pub fn tables(&self) -> Result<Vec<String>> {
        let conn = self.index.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT table_name FROM idx")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }
        Ok(tables)
    }

    /// Drop every memoized lookup
    pub fn invalidate_memo(&self) {
        self.memo.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_temp_router() -> (TempDir, ShardRouter) {
        let temp_dir = TempDir::new().unwrap();
        let router = ShardRouter::open(temp_dir.path()).unwrap();
        (temp_dir, router)
    }

    fn row(table: &str, key: &str, shard: u64) -> (String, String, u64) {
        (table.to_string(), key.to_string(), shard)
    }

    #[test]
    fn test_lookup_unrouted_key() {
        let (_temp, router) = setup_temp_router();

        assert_eq!(router.lookup("t", "k").unwrap(), None);
    }

    #[test]
    fn test_record_then_lookup() {
        let (_temp, router) = setup_temp_router();

        router.record(&[row("t", "k1", 0), row("t", "k2", 3)]).unwrap();

        assert_eq!(router.lookup("t", "k1").unwrap(), Some(0));
        assert_eq!(router.lookup("t", "k2").unwrap(), Some(3));
        // Memoized second lookup agrees
        assert_eq!(router.lookup("t", "k2").unwrap(), Some(3));
    }

    #[test]
    fn test_negative_lookup_is_invalidated_by_record() {
        let (_temp, router) = setup_temp_router();

        // Memoize the miss, then route the key
        assert_eq!(router.lookup("t", "k").unwrap(), None);
        router.record(&[row("t", "k", 5)]).unwrap();

        // A stale memo here would misroute the key
        assert_eq!(router.lookup("t", "k").unwrap(), Some(5));
    }

    #[test]
    fn test_forget_removes_routing() {
        let (_temp, router) = setup_temp_router();

        router.record(&[row("t", "k", 1)]).unwrap();
        router.forget("t", &["k".to_string()]).unwrap();

        assert_eq!(router.lookup("t", "k").unwrap(), None);
    }

    #[test]
    fn test_active_shard_restored_on_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let router = ShardRouter::open(temp_dir.path()).unwrap();
            assert_eq!(router.active_shard(), 0);
            router.record(&[row("t", "a", 0), row("t", "b", 4)]).unwrap();
        }

        let router = ShardRouter::open(temp_dir.path()).unwrap();
        assert_eq!(router.active_shard(), 4);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let (_temp, router) = setup_temp_router();

        assert_eq!(router.advance_active(), 1);
        assert_eq!(router.advance_active(), 2);
        assert_eq!(router.active_shard(), 2);
    }

    #[test]
    fn test_keys_and_tables_enumeration() {
        let (_temp, router) = setup_temp_router();

        router
            .record(&[row("users", "u1", 0), row("users", "u2", 0), row("posts", "p1", 1)])
            .unwrap();

        let keys = router.keys("users").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("u1"));

        let mut tables = router.tables().unwrap();
        tables.sort();
        assert_eq!(tables, vec!["posts".to_string(), "users".to_string()]);
    }

    #[test]
    fn test_forget_table_clears_all_routing() {
        let (_temp, router) = setup_temp_router();

        router.record(&[row("t", "a", 0), row("t", "b", 1)]).unwrap();
        router.forget_table("t").unwrap();

        assert!(router.keys("t").unwrap().is_empty());
        assert_eq!(router.lookup("t", "a").unwrap(), None);
    }
}
