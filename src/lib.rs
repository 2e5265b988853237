//! # StrataKV
//!
//! An embedded key-value storage engine built from three composable tiers:
//! - A durable single-file store with write-back caching
//! - A horizontally sharded store behind a routing index
//! - A RAM-resident cache tier with TTL expiry and LRU eviction
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Cache (RAM tier)                      │
//! │      LRU + TTL · middleware · watchers · expiry sweeper      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Store trait
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │ SingleFile  │          │   Sharded    │
//!   │ (one file)  │          │ router+pool  │
//!   └──────┬──────┘          └──────┬───────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │ TableStore  │          │ TableStore   │  (one per shard)
//!   │ write-back  │          │ write-back   │
//!   └─────────────┘          └──────────────┘
//! ```
//!
//! The engine is embedded, single-process, and fully synchronous: worker
//! threads call in concurrently and block for the duration of lock
//! acquisition and I/O. Writes land in RAM and reach disk on `flush`;
//! deletes at the backend level are immediate.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod sync;
pub mod backend;
pub mod shard;
pub mod cache;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StrataError};
pub use config::{BackendKind, Config};

pub use backend::{SingleFile, Store};
pub use cache::Cache;
pub use shard::Sharded;

/// The engine's opaque value type
pub use serde_json::Value;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
