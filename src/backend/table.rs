//! Backing Table Access
//!
//! The one module that talks to the durable storage medium. Everything above
//! it sees an opaque ordered key-value table: point lookup, chunked batch
//! lookup, transactional batch upsert, delete, and full scan, addressed by
//! table name.
//!
//! Row shape per logical table: `key TEXT PRIMARY KEY, value ANY`. Text rows
//! hold plain payloads, blob rows hold compressed ones.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::codec::Payload;
use crate::error::{Result, StrataError};

/// Upper bound on bound parameters per batch statement
pub const MAX_BATCH_PARAMS: usize = 900;

/// One physical storage file holding any number of logical tables
///
/// Table names are validated at the public boundary; only `[A-Za-z0-9_]+`
/// reaches the statements built here.
pub struct TableFile {
    conn: Connection,
    path: PathBuf,
}

impl TableFile {
    /// Open or create the file and apply the durability pragmas
    ///
    /// WAL journaling with relaxed sync is advisory tuning only; the engine
    /// assumes single-process exclusive access to its files.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Path of the physical file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the table if it does not exist yet
    pub fn ensure_table(&self, table: &str) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (key TEXT PRIMARY KEY, value ANY)"
        ))?;
        Ok(())
    }

    /// Point lookup; absent rows yield `None`
    pub fn fetch(&self, table: &str, key: &str) -> Result<Option<Payload>> {
        self.ensure_table(table)?;
        let row = self
            .conn
            .query_row(
                &format!("SELECT value FROM {table} WHERE key = ?1"),
                params![key],
                |row| row.get::<_, SqlValue>(0),
            )
            .optional()?;
        row.map(payload_from_sql).transpose()
    }

    /// Batch lookup, chunked at the parameter limit
    ///
    /// Rows the table does not hold are simply omitted from the result.
    pub fn fetch_many(&self, table: &str, keys: &[String]) -> Result<Vec<(String, Payload)>> {
        self.ensure_table(table)?;
        let mut rows = Vec::new();
        for chunk in keys.chunks(MAX_BATCH_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let mut stmt = self.conn.prepare(&format!(
                "SELECT key, value FROM {table} WHERE key IN ({placeholders})"
            ))?;
            let mapped = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, SqlValue>(1)?))
            })?;
            for item in mapped {
                let (key, value) = item?;
                rows.push((key, payload_from_sql(value)?));
            }
        }
        Ok(rows)
    }

    /// Insert-or-replace every row inside one transaction
    pub fn upsert_many(&mut self, table: &str, rows: &[(String, Payload)]) -> Result<()> {
        self.ensure_table(table)?;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {table} (key, value) VALUES (?1, ?2)"
            ))?;
            for (key, payload) in rows {
                stmt.execute(params![key, sql_from_payload(payload)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete the given keys, chunked, committed as one transaction
    pub fn remove_many(&mut self, table: &str, keys: &[String]) -> Result<()> {
        self.ensure_table(table)?;
        let tx = self.conn.transaction()?;
        for chunk in keys.chunks(MAX_BATCH_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            tx.execute(
                &format!("DELETE FROM {table} WHERE key IN ({placeholders})"),
                params_from_iter(chunk.iter()),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Existence check without reading the value column
    pub fn exists(&self, table: &str, key: &str) -> Result<bool> {
        self.ensure_table(table)?;
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE key = ?1 LIMIT 1"),
                params![key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All keys the table holds on disk
    pub fn keys(&self, table: &str) -> Result<std::collections::BTreeSet<String>> {
        self.ensure_table(table)?;
        let mut stmt = self.conn.prepare(&format!("SELECT key FROM {table}"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = std::collections::BTreeSet::new();
        for row in rows {
            keys.insert(row?);
        }
        Ok(keys)
    }

    /// Full scan of the table
    pub fn scan(&self, table: &str) -> Result<Vec<(String, Payload)>> {
        self.ensure_table(table)?;
        let mut stmt = self.conn.prepare(&format!("SELECT key, value FROM {table}"))?;
        let mapped = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, SqlValue>(1)?))
        })?;
        let mut rows = Vec::new();
        for item in mapped {
            let (key, value) = item?;
            rows.push((key, payload_from_sql(value)?));
        }
        Ok(rows)
    }

    /// User tables present in the file's catalog
    pub fn tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }
        Ok(tables)
    }

    /// Wipe all rows, keeping the table shell
    pub fn clear_table(&self, table: &str) -> Result<()> {
        self.ensure_table(table)?;
        self.conn.execute(&format!("DELETE FROM {table}"), [])?;
        Ok(())
    }

    /// Remove the table entirely
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        Ok(())
    }

    /// Bytes the file occupies on disk, including the WAL sidecar
    pub fn size_on_disk(&self) -> u64 {
        let main = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let mut wal_path = self.path.as_os_str().to_os_string();
        wal_path.push("-wal");
        let wal = fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
        main + wal
    }
}

/// Map a stored column back onto a payload
fn payload_from_sql(value: SqlValue) -> Result<Payload> {
    match value {
        SqlValue::Text(text) => Ok(Payload::Text(text)),
        SqlValue::Blob(blob) => Ok(Payload::Blob(blob)),
        other => Err(StrataError::Payload(format!(
            "expected text or blob row, found {other:?}"
        ))),
    }
}

/// Map a payload onto its stored column form
fn sql_from_payload(payload: &Payload) -> SqlValue {
    match payload {
        Payload::Text(text) => SqlValue::Text(text.clone()),
        Payload::Blob(blob) => SqlValue::Blob(blob.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_temp_file() -> (TempDir, TableFile) {
        let temp_dir = TempDir::new().unwrap();
        let file = TableFile::open(&temp_dir.path().join("test.db")).unwrap();
        (temp_dir, file)
    }

    fn text(value: &str) -> Payload {
        Payload::Text(value.to_string())
    }

    #[test]
    fn test_fetch_missing_row() {
        let (_temp, file) = setup_temp_file();

        assert_eq!(file.fetch("t", "missing").unwrap(), None);
    }

    #[test]
    fn test_upsert_then_fetch() {
        let (_temp, mut file) = setup_temp_file();

        file.upsert_many("t", &[("k1".into(), text("\"v1\""))]).unwrap();

        assert_eq!(file.fetch("t", "k1").unwrap(), Some(text("\"v1\"")));
        assert!(file.exists("t", "k1").unwrap());
        assert!(!file.exists("t", "k2").unwrap());
    }

    #[test]
    fn test_upsert_replaces() {
        let (_temp, mut file) = setup_temp_file();

        file.upsert_many("t", &[("k".into(), text("\"old\""))]).unwrap();
        file.upsert_many("t", &[("k".into(), text("\"new\""))]).unwrap();

        assert_eq!(file.fetch("t", "k").unwrap(), Some(text("\"new\"")));
        assert_eq!(file.keys("t").unwrap().len(), 1);
    }

    #[test]
    fn test_fetch_many_exceeding_chunk_limit() {
        let (_temp, mut file) = setup_temp_file();

        let rows: Vec<(String, Payload)> = (0..2500)
            .map(|i| (format!("key{i:04}"), text(&format!("{i}"))))
            .collect();
        file.upsert_many("t", &rows).unwrap();

        let keys: Vec<String> = rows.iter().map(|(k, _)| k.clone()).collect();
        let fetched = file.fetch_many("t", &keys).unwrap();
        assert_eq!(fetched.len(), 2500);

        // Absent keys are omitted, not errors
        let sparse = file
            .fetch_many("t", &["key0000".into(), "nope".into()])
            .unwrap();
        assert_eq!(sparse.len(), 1);
    }

    #[test]
    fn test_remove_many_exceeding_chunk_limit() {
        let (_temp, mut file) = setup_temp_file();

        let rows: Vec<(String, Payload)> = (0..1000)
            .map(|i| (format!("key{i:04}"), text("1")))
            .collect();
        file.upsert_many("t", &rows).unwrap();

        let keys: Vec<String> = rows.iter().map(|(k, _)| k.clone()).collect();
        file.remove_many("t", &keys).unwrap();

        assert!(file.keys("t").unwrap().is_empty());
    }

    #[test]
    fn test_blob_payloads_round_trip() {
        let (_temp, mut file) = setup_temp_file();

        let blob = Payload::Blob(vec![0x00, 0xFF, 0x42]);
        file.upsert_many("t", &[("bin".into(), blob.clone())]).unwrap();

        assert_eq!(file.fetch("t", "bin").unwrap(), Some(blob));
    }

    #[test]
    fn test_tables_lists_user_tables_only() {
        let (_temp, file) = setup_temp_file();

        file.ensure_table("alpha").unwrap();
        file.ensure_table("beta").unwrap();

        let mut tables = file.tables().unwrap();
        tables.sort();
        assert_eq!(tables, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_clear_keeps_shell_drop_removes() {
        let (_temp, mut file) = setup_temp_file();

        file.upsert_many("t", &[("k".into(), text("1"))]).unwrap();
        file.clear_table("t").unwrap();
        assert!(file.tables().unwrap().contains(&"t".to_string()));
        assert!(file.keys("t").unwrap().is_empty());

        file.drop_table("t").unwrap();
        assert!(!file.tables().unwrap().contains(&"t".to_string()));
    }

    #[test]
    fn test_size_on_disk_grows_with_data() {
        let (_temp, mut file) = setup_temp_file();

        let before = file.size_on_disk();
        let rows: Vec<(String, Payload)> = (0..100)
            .map(|i| (format!("k{i}"), text(&"0".repeat(512))))
            .collect();
        file.upsert_many("t", &rows).unwrap();

        assert!(file.size_on_disk() > before);
    }
}
