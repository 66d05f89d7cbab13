//! Wire codec for the per-key lock set.
//!
//! The value stored under a lock key is a JSON array of holder entries.
//! Decoding is deliberately permissive: an absent key, malformed JSON, or a
//! non-array payload all read as "no holders", and array elements that are
//! not objects are skipped. Callers never observe a decode failure.

use serde_json::Value;

use crate::entry::LockEntry;
use crate::store::Witness;

/// Decode the observed payload into the entry list.
pub fn decode(witness: &Witness) -> Vec<LockEntry> {
    let Witness::Present(payload) = witness else {
        return Vec::new();
    };
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(payload) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter(|item| item.is_object())
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// Encode the entry list as the JSON array used verbatim as the CAS value.
pub fn encode(entries: &[LockEntry]) -> serde_json::Result<String> {
    serde_json::to_string(entries)
}

/// Drop expired entries in place, preserving relative order.
pub fn purge_expired(entries: &mut Vec<LockEntry>, now: i64) {
    entries.retain(|entry| !entry.is_expired(now));
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn present(payload: &str) -> Witness {
        Witness::Present(payload.to_string())
    }

    #[test]
    fn test_decode_absent_is_empty() {
        assert!(decode(&Witness::Absent).is_empty());
    }

    #[test]
    fn test_decode_malformed_is_empty() {
        assert!(decode(&present("{not json")).is_empty());
        assert!(decode(&present("")).is_empty());
    }

    #[test]
    fn test_decode_non_array_is_empty() {
        assert!(decode(&present(r#"{"by":"a","until":1,"exclusive":false}"#)).is_empty());
        assert!(decode(&present("42")).is_empty());
        assert!(decode(&present("\"locked\"")).is_empty());
    }

    #[test]
    fn test_decode_skips_non_object_elements() {
        let entries = decode(&present(
            r#"[1, "junk", {"by":"a","until":10,"exclusive":true}, null, []]"#,
        ));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].by.as_deref(), Some("a"));
        assert!(entries[0].exclusive);
    }

    #[test]
    fn test_decode_tolerates_missing_fields() {
        let entries = decode(&present(r#"[{"until": 7}, {"by": null, "until": 8}]"#));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].by, None);
        assert_eq!(entries[1].until, 8);
    }

    #[test]
    fn test_encode_then_decode_preserves_entries() {
        let entries = vec![
            LockEntry::new("a", 100, false),
            LockEntry::new("b", 200, true),
        ];
        let payload = encode(&entries).unwrap();
        assert_eq!(decode(&present(&payload)), entries);
    }

    #[test]
    fn test_purge_preserves_order() {
        let mut entries = vec![
            LockEntry::new("a", 5, false),
            LockEntry::new("b", 50, false),
            LockEntry::new("c", 2, true),
            LockEntry::new("d", 60, false),
        ];
        purge_expired(&mut entries, 10);
        let holders: Vec<_> = entries.iter().filter_map(|e| e.by.as_deref()).collect();
        assert_eq!(holders, ["b", "d"]);
    }

    prop_compose! {
        fn arb_element()(
            choice in 0usize..4,
            by in proptest::option::of("[a-z]{1,8}"),
            until in any::<i32>(),
            exclusive in any::<bool>(),
        ) -> String {
            match choice {
                0 => serde_json::json!({"by": by, "until": until, "exclusive": exclusive}).to_string(),
                1 => serde_json::json!(until).to_string(),
                2 => "\"junk\"".to_string(),
                _ => serde_json::json!({"until": until}).to_string(),
            }
        }
    }

    proptest! {
        // Decoding is a fixpoint: re-encoding what was decoded and decoding
        // again loses nothing, whatever the input array contained.
        #[test]
        fn test_decode_encode_decode_fixpoint(elements in proptest::collection::vec(arb_element(), 0..8)) {
            let payload = format!("[{}]", elements.join(","));
            let first = decode(&present(&payload));
            let reencoded = encode(&first).unwrap();
            let second = decode(&present(&reencoded));
            prop_assert_eq!(first, second);
        }
    }
}
