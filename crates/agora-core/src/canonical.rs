use serde_json::Value;

/// Canonical JSON serialization: compact encoding with lexicographically
/// ordered keys at every level. serde_json's map type is ordered, so a
/// `Value` round-tripped through it always serializes the same way.
///
/// Acceptance-criteria hashes and checksum tests are both defined over this
/// encoding.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Byte length of the canonical serialization; the storage fee is priced
/// against this.
pub fn serialized_size(value: &Value) -> u64 {
    canonical_json(value).len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_ordered() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"z":1,"y":2}}"#).unwrap();
        assert_eq!(canonical_json(&a), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = json!({"x": 1, "records": [1, 2, 3]});
        let b: Value = serde_json::from_str(r#"{"records":[1,2,3],"x":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
