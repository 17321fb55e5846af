//! Hash helpers (BLAKE3, hex).

use blake3::Hasher;
use serde_json::Value;

use super::to_canonical_json;

/// Hashea un string y devuelve hex.
pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Hash de la forma canónica de un valor JSON.
pub fn hash_value(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_hash() {
        assert_eq!(hash_value(&json!({"a": 1, "b": 2})), hash_value(&json!({"b": 2, "a": 1})));
    }
}
