//! Value Codec
//!
//! Turns engine values into storage-ready payloads and back.
//!
//! Values serialize to JSON text; anything longer than the configured
//! threshold is compressed and stored as a binary payload instead. The two
//! forms map directly onto the backing table's text and blob column types,
//! which is also how decoding tells them apart.

use serde_json::Value;

use crate::error::Result;

/// Default cutoff above which serialized payloads are compressed (bytes)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// A storage-ready encoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Plain JSON text (at or below the compression threshold)
    Text(String),

    /// Compressed JSON (above the threshold)
    Blob(Vec<u8>),
}

/// Encodes and decodes values for the backing tables
#[derive(Debug, Clone)]
pub struct Codec {
    threshold: usize,
}

impl Codec {
    /// Create a codec with the given compression threshold (in bytes)
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Serialize a value, compressing when the JSON form exceeds the threshold
    pub fn encode(&self, value: &Value) -> Result<Payload> {
        let text = serde_json::to_string(value)?;
        if text.len() > self.threshold {
            let compressed = zstd::encode_all(text.as_bytes(), 0)?;
            Ok(Payload::Blob(compressed))
        } else {
            Ok(Payload::Text(text))
        }
    }

    /// Deserialize a payload, detecting the compressed form by its shape
    ///
    /// Corruption surfaces here as a decode error; writes never validate.
    pub fn decode(&self, payload: Payload) -> Result<Value> {
        match payload {
            Payload::Text(text) => Ok(serde_json::from_str(&text)?),
            Payload::Blob(bytes) => {
                let raw = zstd::decode_all(bytes.as_slice())?;
                Ok(serde_json::from_slice(&raw)?)
            }
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD)
    }
}
