//! Error types for StrataKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for StrataKV operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Backing Table Errors
    // -------------------------------------------------------------------------
    #[error("backing table error: {0}")]
    Backing(#[from] rusqlite::Error),

    #[error("unreadable stored payload: {0}")]
    Payload(String),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    // -------------------------------------------------------------------------
    // Cache Tier Errors
    // -------------------------------------------------------------------------
    #[error("middleware failed for key {key:?}: {reason}")]
    Middleware { key: String, reason: String },
}

impl StrataError {
    /// Build a middleware failure for the given key.
    pub fn middleware(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Middleware {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
