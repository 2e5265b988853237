//! Shard Module
//!
//! Horizontal partitioning over many physical storage files.
//!
//! ## Responsibilities
//! - Route every (table, key) to exactly one shard via a durable master index
//! - Rotate the active shard when it outgrows the configured size bound
//! - Keep a bounded memo of recent lookups, invalidated on index mutation
//!
//! ```text
//!                    ┌──────────────────┐
//!                    │     Sharded      │
//!                    │  (RwLock phases) │
//!                    └────────┬─────────┘
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!       ┌────────────┐ ┌────────────┐ ┌────────────┐
//!       │ ShardRouter│ │  Shard 0   │ │  Shard N   │
//!       │ (index+memo)│ │ TableStore │ │ TableStore │
//!       └────────────┘ └────────────┘ └────────────┘
//! ```

mod backend;
mod router;

pub use backend::Sharded;
pub use router::ShardRouter;

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};

use crate::backend::TableStore;
use crate::codec::Codec;
use crate::error::Result;

/// One physical partition: a table store over its own file, behind its own
/// mutex
pub struct Shard {
    id: u64,
    store: Mutex<TableStore>,
}

impl Shard {
    /// Open or create `shard_{id}.db` under the storage root
    pub fn open(root: &Path, id: u64, codec: Codec) -> Result<Self> {
        let store = TableStore::open(&Self::file_path(root, id), codec)?;
        Ok(Self {
            id,
            store: Mutex::new(store),
        })
    }

    /// Shard id (monotonic, never reused)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lock and expose the shard's table store
    pub(crate) fn store(&self) -> MutexGuard<'_, TableStore> {
        self.store.lock()
    }

    /// Size captured at the shard's last flush
    pub fn size_estimate(&self) -> u64 {
        self.store.lock().size_estimate()
    }

    /// Storage file path for a shard id
    pub fn file_path(root: &Path, id: u64) -> PathBuf {
        root.join(format!("shard_{id}.db"))
    }

    /// Parse a shard id from a file path
    /// "shard_42.db" → Some(42)
    pub fn parse_id(path: &Path) -> Option<u64> {
        if path.extension()? != "db" {
            return None;
        }
        let stem = path.file_stem()?.to_string_lossy();
        stem.strip_prefix("shard_")?.parse().ok()
    }
}
