//! TTL-Wrapped Entries
//!
//! Every value resident in the cache tier carries an optional absolute
//! expiry. The wrapper also defines the persisted shape (`val` + `ttl`
//! fields) so entries flushed by one run are adopted transparently by the
//! next.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seconds since the Unix epoch, sub-second precision
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A cached value with an optional absolute expiry timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlEntry {
    #[serde(rename = "val")]
    pub value: Value,

    /// Epoch seconds after which the entry is dead; `None` never expires
    #[serde(rename = "ttl")]
    pub expires_at: Option<f64>,
}

impl TtlEntry {
    /// Wrap a value, computing the absolute expiry from a relative TTL
    pub fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| now_epoch() + t.as_secs_f64()),
        }
    }

    /// True once the expiry timestamp lies in the past
    pub fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Adopt a backend-resident value
    ///
    /// Wrappers written by a previous run carry both fields and are taken
    /// as-is; any other shape is wrapped with no expiry.
    pub fn from_stored(raw: Value) -> Self {
        if let Value::Object(map) = &raw {
            if map.contains_key("val") && map.contains_key("ttl") {
                if let Ok(entry) = serde_json::from_value::<TtlEntry>(raw.clone()) {
                    return entry;
                }
            }
        }
        Self {
            value: raw,
            expires_at: None,
        }
    }

    /// The persisted shape handed to the backend on flush
    pub fn to_stored(&self) -> Value {
        serde_json::json!({ "val": self.value, "ttl": self.expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = TtlEntry::new(json!(1), None);

        assert!(!entry.is_expired(now_epoch() + 1_000_000.0));
    }

    #[test]
    fn test_ttl_expires_after_elapsing() {
        let entry = TtlEntry::new(json!(1), Some(Duration::from_secs(10)));

        let now = now_epoch();
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + 11.0));
    }

    #[test]
    fn test_stored_wrapper_round_trips() {
        let entry = TtlEntry::new(json!({"a": [1, 2]}), Some(Duration::from_secs(5)));

        let adopted = TtlEntry::from_stored(entry.to_stored());
        assert_eq!(adopted, entry);
    }

    #[test]
    fn test_plain_values_adopt_without_expiry() {
        let adopted = TtlEntry::from_stored(json!({"name": "plain"}));

        assert_eq!(adopted.value, json!({"name": "plain"}));
        assert_eq!(adopted.expires_at, None);
    }

    #[test]
    fn test_lookalike_objects_are_not_wrappers() {
        // Only objects with BOTH marker fields count as wrappers
        let adopted = TtlEntry::from_stored(json!({"val": 3}));

        assert_eq!(adopted.value, json!({"val": 3}));
        assert_eq!(adopted.expires_at, None);
    }
}
