//! Configuration for StrataKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Which durable backend the engine runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// One storage file holding every table
    SingleFile,

    /// Many shard files behind a routing index
    Sharded,
}

/// Main configuration for a StrataKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Backend variant to open
    pub backend: BackendKind,

    /// Root directory for all storage files
    /// Internal structure (sharded backend):
    ///   {path}/
    ///     ├── master_index.db   (routing index)
    ///     └── shard_{id}.db     (one file per shard)
    pub path: PathBuf,

    /// File name stem for the single-file backend ("{name}.db")
    pub name: String,

    /// Table used when an operation does not name one
    pub default_table: String,

    // -------------------------------------------------------------------------
    // Sharding Configuration
    // -------------------------------------------------------------------------
    /// Soft upper bound on a shard file's size before rotation (bytes)
    pub max_shard_size: u64,

    // -------------------------------------------------------------------------
    // Codec Configuration
    // -------------------------------------------------------------------------
    /// Serialized payloads longer than this are compressed (bytes)
    pub compression_threshold: usize,

    // -------------------------------------------------------------------------
    // Cache Tier Configuration
    // -------------------------------------------------------------------------
    /// Max resident keys per table before LRU eviction
    pub max_keys: usize,

    /// Load backend data into RAM on open (up to `max_keys` per table)
    pub preload: bool,

    /// Interval between background expiry sweeps
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::SingleFile,
            path: PathBuf::from("./stratakv_data"),
            name: "data".to_string(),
            default_table: "storage".to_string(),
            max_shard_size: 100 * 1024 * 1024, // 100 MB
            compression_threshold: 1024,
            max_keys: 100_000,
            preload: false,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backend variant
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    /// Set the storage root directory
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the single-file backend's file name stem
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the default table name
    pub fn default_table(mut self, table: impl Into<String>) -> Self {
        self.config.default_table = table.into();
        self
    }

    /// Set the maximum shard size before rotation (in bytes)
    pub fn max_shard_size(mut self, bytes: u64) -> Self {
        self.config.max_shard_size = bytes;
        self
    }

    /// Set the compression threshold (in bytes)
    pub fn compression_threshold(mut self, bytes: usize) -> Self {
        self.config.compression_threshold = bytes;
        self
    }

    /// Set the maximum resident keys per table
    pub fn max_keys(mut self, count: usize) -> Self {
        self.config.max_keys = count;
        self
    }

    /// Enable or disable preloading backend data on open
    pub fn preload(mut self, preload: bool) -> Self {
        self.config.preload = preload;
        self
    }

    /// Set the background expiry sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
