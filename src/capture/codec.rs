//! Request body decoding
//!
//! Bodies arrive as raw bytes. They are read as UTF-8 and parsed as JSON;
//! a form-style percent-encoded body is retried after percent-decoding.
//! String lists that the site double-encodes (UTF-8 bytes read back as
//! Latin-1) are repaired after parsing.

use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Fields whose string entries may arrive Latin-1 mis-decoded
pub const REPAIRED_LIST_FIELDS: &[&str] = &["hot_words"];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("request body is empty")]
    Empty,
    #[error("request body is not JSON: {0}")]
    NotJson(String),
    #[error("request body is not a JSON object")]
    NotObject,
}

/// Decode a captured request body into a JSON object
pub fn decode_body(raw: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    let text = String::from_utf8_lossy(raw);
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    let value = match serde_json::from_str::<Value>(&text) {
        Ok(value) => value,
        Err(first) => {
            let decoded = percent_decode_str(&text)
                .decode_utf8()
                .map_err(|_| DecodeError::NotJson(first.to_string()))?;
            debug!("request body parsed after percent-decoding");
            serde_json::from_str(&decoded).map_err(|e| DecodeError::NotJson(e.to_string()))?
        }
    };

    match value {
        Value::Object(mut body) => {
            for field in REPAIRED_LIST_FIELDS {
                if let Some(Value::Array(items)) = body.get_mut(*field) {
                    for item in items.iter_mut() {
                        if let Value::String(s) = item {
                            *s = repair_mojibake(s);
                        }
                    }
                }
            }
            Ok(body)
        }
        _ => Err(DecodeError::NotObject),
    }
}

/// Undo a UTF-8 string that was decoded as Latin-1.
///
/// Applies only when every char fits in one byte and the bytes form valid
/// UTF-8; anything else is returned unchanged.
pub fn repair_mojibake(s: &str) -> String {
    if s.is_ascii() || s.chars().any(|c| c as u32 > 0xFF) {
        return s.to_string();
    }
    let bytes: Vec<u8> = s.chars().map(|c| c as u8).collect();
    String::from_utf8(bytes).unwrap_or_else(|_| s.to_string())
}
