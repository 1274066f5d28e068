//! Byte-size estimation used by the truncation and batching algorithms.

use serde_json::Value;

/// The encoded size of a value, or `0` if it cannot be serialized.
///
/// Callers that need to distinguish "zero bytes" from "unserializable"
/// should use [`try_json_byte_size`] instead.
pub fn json_byte_size(value: &Value) -> usize {
    try_json_byte_size(value).unwrap_or(0)
}

/// The encoded size of a value, or the serialization error.
pub fn try_json_byte_size(value: &Value) -> Result<usize, serde_json::Error> {
    serde_json::to_vec(value).map(|bytes| bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn measures_compact_encoding() {
        assert_eq!(json_byte_size(&json!({"a": 1})), 8);
    }

    #[test]
    fn empty_string_is_two_bytes() {
        assert_eq!(json_byte_size(&json!("")), 2);
    }

    #[test]
    fn null_is_four_bytes() {
        assert_eq!(json_byte_size(&Value::Null), 4);
    }
}
