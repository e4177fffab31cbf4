use md5::{Digest, Md5};
use serde_json::Value;

use super::error::CacheError;

/// Derives the cache key component for a set of loader arguments.
///
/// A single string or number argument is used verbatim. Anything else
/// (objects, arrays, booleans, null, or a multi-argument tuple already
/// collapsed into one JSON value by the caller) is canonicalized to JSON
/// and MD5-hashed. `serde_json::Value`'s object representation is a
/// `BTreeMap` by default (the `preserve_order` feature is not enabled in
/// this crate), so object keys are always serialized in sorted order —
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` derive the same key.
pub fn derive_key(args: &Value) -> String {
    match args {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            let canonical = other.to_string();
            let digest = Md5::digest(canonical.as_bytes());
            format!("{digest:x}")
        }
    }
}

const ALLOWED_EXTRA_CHARS: [char; 6] = [':', '_', '-', '.', '[', ']'];

/// Validates a loader name against `[A-Za-z0-9:_\-.\[\]]+`.
pub fn validate_name(name: &str) -> Result<(), CacheError> {
    if name.is_empty() {
        return Err(CacheError::ValidationFail("loader name must not be empty".into()));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || ALLOWED_EXTRA_CHARS.contains(&c));
    if !valid {
        return Err(CacheError::ValidationFail(format!(
            "loader name `{name}` must match [A-Za-z0-9:_\\-.\\[\\]]+"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_string_is_used_verbatim() {
        assert_eq!(derive_key(&Value::String("u1".into())), "u1");
    }

    #[test]
    fn scalar_number_is_used_verbatim() {
        assert_eq!(derive_key(&serde_json::json!(1)), "1");
    }

    #[test]
    fn derive_key_is_idempotent() {
        let value = serde_json::json!({"a": 1, "b": [1, 2, 3]});
        assert_eq!(derive_key(&value), derive_key(&value));
    }

    #[test]
    fn object_key_order_does_not_change_derived_key() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn different_values_derive_different_keys() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn valid_name_is_accepted() {
        assert!(validate_name("users:profile-v1.0[en]").is_ok());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(validate_name("").is_err());
    }

    #[test]
    fn name_with_slash_is_rejected() {
        assert!(validate_name("users/profile").is_err());
    }
}
