//! Parameter validation for the protocol methods.
//!
//! Enforces key/value/TTL/batch-count limits before any key is resolved or
//! any backend call is issued. Values cross the protocol boundary as
//! base64; the `max_val` limit applies to the decoded byte length.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use kvc_types::ErrorCode;
use serde_json::{Map, Value};

/// A parameter validation failure, carrying the protocol error code to
/// surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalid {
    /// Code to surface to the client.
    pub code: ErrorCode,
    /// Short, non-revealing message.
    pub message: String,
}

impl Invalid {
    /// Build a validation failure.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Extract and validate the `key` parameter.
pub fn key_param(params: &Map<String, Value>, max_key: usize) -> Result<String, Invalid> {
    let key = params
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| Invalid::new(ErrorCode::InvalidKey, "key must be a string"))?;
    check_key(key, max_key)?;
    Ok(key.to_string())
}

/// Extract and validate the `keys` parameter for batched reads.
pub fn keys_param(
    params: &Map<String, Value>,
    mget_max: usize,
    max_key: usize,
) -> Result<Vec<String>, Invalid> {
    let keys = params
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| Invalid::new(ErrorCode::InvalidKey, "keys must be an array"))?;

    if keys.is_empty() {
        return Err(Invalid::new(ErrorCode::InvalidKey, "keys must not be empty"));
    }
    if keys.len() > mget_max {
        return Err(Invalid::new(
            ErrorCode::PayloadTooLarge,
            format!("at most {mget_max} keys per mget"),
        ));
    }

    keys.iter()
        .map(|v| {
            let key = v
                .as_str()
                .ok_or_else(|| Invalid::new(ErrorCode::InvalidKey, "keys must be strings"))?;
            check_key(key, max_key)?;
            Ok(key.to_string())
        })
        .collect()
}

/// Extract and decode the base64 `value` parameter.
pub fn value_param(params: &Map<String, Value>, max_val: usize) -> Result<Vec<u8>, Invalid> {
    let encoded = params
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| Invalid::new(ErrorCode::InvalidValue, "value must be a base64 string"))?;

    let decoded = BASE64
        .decode(encoded)
        .map_err(|_| Invalid::new(ErrorCode::InvalidValue, "value is not valid base64"))?;

    if decoded.len() > max_val {
        return Err(Invalid::new(
            ErrorCode::InvalidValue,
            format!("value exceeds {max_val} bytes"),
        ));
    }
    Ok(decoded)
}

/// Extract the `ttl` parameter as a positive integer.
///
/// `code` selects the error taxonomy of the calling method (`set` reports
/// `INVALID_VALUE`, `expire` reports `INVALID_KEY`).
pub fn ttl_param(
    params: &Map<String, Value>,
    required: bool,
    code: ErrorCode,
) -> Result<Option<u64>, Invalid> {
    match params.get("ttl") {
        None | Some(Value::Null) => {
            if required {
                Err(Invalid::new(code, "ttl is required"))
            } else {
                Ok(None)
            }
        }
        Some(value) => {
            let ttl = value
                .as_u64()
                .filter(|&t| t > 0)
                .ok_or_else(|| Invalid::new(code, "ttl must be a positive integer"))?;
            Ok(Some(ttl))
        }
    }
}

fn check_key(key: &str, max_key: usize) -> Result<(), Invalid> {
    if key.is_empty() {
        return Err(Invalid::new(ErrorCode::InvalidKey, "key must not be empty"));
    }
    if key.len() > max_key {
        return Err(Invalid::new(
            ErrorCode::InvalidKey,
            format!("key exceeds {max_key} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn key_at_limit_accepted() {
        let p = params(json!({"key": "a".repeat(16)}));
        assert_eq!(key_param(&p, 16).unwrap(), "a".repeat(16));
    }

    #[test]
    fn key_over_limit_rejected() {
        let p = params(json!({"key": "a".repeat(17)}));
        assert_eq!(key_param(&p, 16).unwrap_err().code, ErrorCode::InvalidKey);
    }

    #[test]
    fn empty_key_rejected() {
        let p = params(json!({"key": ""}));
        assert_eq!(key_param(&p, 16).unwrap_err().code, ErrorCode::InvalidKey);
    }

    #[test]
    fn missing_key_rejected() {
        let p = params(json!({"other": 1}));
        assert_eq!(key_param(&p, 16).unwrap_err().code, ErrorCode::InvalidKey);
    }

    #[test]
    fn non_string_key_rejected() {
        let p = params(json!({"key": 42}));
        assert_eq!(key_param(&p, 16).unwrap_err().code, ErrorCode::InvalidKey);
    }

    #[test]
    fn value_decodes_base64() {
        let p = params(json!({"value": "SGVsbG8="}));
        assert_eq!(value_param(&p, 100).unwrap(), b"Hello");
    }

    #[test]
    fn value_at_decoded_limit_accepted() {
        let raw = vec![0x58; 8];
        let p = params(json!({"value": BASE64.encode(&raw)}));
        assert_eq!(value_param(&p, 8).unwrap(), raw);
    }

    #[test]
    fn value_over_decoded_limit_rejected() {
        let raw = vec![0x58; 9];
        let p = params(json!({"value": BASE64.encode(&raw)}));
        assert_eq!(value_param(&p, 8).unwrap_err().code, ErrorCode::InvalidValue);
    }

    #[test]
    fn bad_base64_rejected() {
        let p = params(json!({"value": "not base64!!"}));
        assert_eq!(value_param(&p, 100).unwrap_err().code, ErrorCode::InvalidValue);
    }

    #[test]
    fn mget_at_limit_accepted() {
        let keys: Vec<String> = (0..4).map(|i| format!("k{i}")).collect();
        let p = params(json!({"keys": keys}));
        assert_eq!(keys_param(&p, 4, 16).unwrap().len(), 4);
    }

    #[test]
    fn mget_over_limit_rejected() {
        let keys: Vec<String> = (0..5).map(|i| format!("k{i}")).collect();
        let p = params(json!({"keys": keys}));
        assert_eq!(
            keys_param(&p, 4, 16).unwrap_err().code,
            ErrorCode::PayloadTooLarge
        );
    }

    #[test]
    fn mget_empty_rejected() {
        let p = params(json!({"keys": []}));
        assert_eq!(keys_param(&p, 4, 16).unwrap_err().code, ErrorCode::InvalidKey);
    }

    #[test]
    fn ttl_optional_when_absent() {
        let p = params(json!({}));
        assert_eq!(ttl_param(&p, false, ErrorCode::InvalidValue).unwrap(), None);
    }

    #[test]
    fn ttl_required_when_absent() {
        let p = params(json!({}));
        assert_eq!(
            ttl_param(&p, true, ErrorCode::InvalidKey).unwrap_err().code,
            ErrorCode::InvalidKey
        );
    }

    #[test]
    fn ttl_zero_rejected() {
        let p = params(json!({"ttl": 0}));
        assert!(ttl_param(&p, true, ErrorCode::InvalidKey).is_err());
    }

    #[test]
    fn ttl_negative_rejected() {
        let p = params(json!({"ttl": -5}));
        assert!(ttl_param(&p, false, ErrorCode::InvalidValue).is_err());
    }

    #[test]
    fn ttl_positive_accepted() {
        let p = params(json!({"ttl": 60}));
        assert_eq!(
            ttl_param(&p, false, ErrorCode::InvalidValue).unwrap(),
            Some(60)
        );
    }
}
