//! Lock entry model.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

/// One holder's record under a lock key.
///
/// Serialized as a JSON object inside the per-key array so that independent
/// processes sharing a store agree on the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockEntry {
    /// Identifier of the holder. Every entry this library writes carries
    /// one; optional so payloads from foreign writers with the field
    /// missing or null still decode.
    #[serde(default)]
    pub by: Option<String>,
    /// Absolute expiry in whole seconds since the Unix epoch.
    #[serde(default)]
    pub until: i64,
    /// True for an exclusive hold, false for a shared one.
    #[serde(default)]
    pub exclusive: bool,
}

impl LockEntry {
    /// Create an entry owned by `by`, expiring at `until`.
    pub fn new(by: impl Into<String>, until: i64, exclusive: bool) -> Self {
        Self {
            by: Some(by.into()),
            until,
            exclusive,
        }
    }

    /// Whether this entry belongs to `identifier`.
    pub fn held_by(&self, identifier: &str) -> bool {
        self.by.as_deref() == Some(identifier)
    }

    /// Whether the entry has expired at `now` (seconds since epoch).
    pub fn is_expired(&self, now: i64) -> bool {
        self.until < now
    }

    /// Seconds left until expiry at `now`; non-positive once expired.
    pub fn remaining(&self, now: i64) -> i64 {
        self.until - now
    }
}

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry_boundary() {
        let entry = LockEntry::new("a", 100, false);
        assert!(!entry.is_expired(99));
        assert!(!entry.is_expired(100));
        assert!(entry.is_expired(101));
    }

    #[test]
    fn test_entry_remaining() {
        let entry = LockEntry::new("a", 100, false);
        assert_eq!(entry.remaining(90), 10);
        assert_eq!(entry.remaining(100), 0);
        assert_eq!(entry.remaining(105), -5);
    }

    #[test]
    fn test_entry_held_by() {
        let entry = LockEntry::new("a", 100, true);
        assert!(entry.held_by("a"));
        assert!(!entry.held_by("b"));

        let anonymous = LockEntry {
            by: None,
            until: 100,
            exclusive: false,
        };
        assert!(!anonymous.held_by("a"));
    }

    #[test]
    fn test_entry_wire_field_names() {
        let entry = LockEntry::new("worker-1", 1700000000, true);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["by"], "worker-1");
        assert_eq!(json["until"], 1700000000i64);
        assert_eq!(json["exclusive"], true);
    }

    #[test]
    fn test_entry_decodes_with_missing_fields() {
        let entry: LockEntry = serde_json::from_str(r#"{"until": 42}"#).unwrap();
        assert_eq!(entry.by, None);
        assert_eq!(entry.until, 42);
        assert!(!entry.exclusive);
    }

    #[test]
    fn test_now_unix_secs_is_sane() {
        // Well after 2020-01-01, well before the year 3000.
        let now = now_unix_secs();
        assert!(now > 1_577_836_800);
        assert!(now < 32_503_680_000);
    }
}
