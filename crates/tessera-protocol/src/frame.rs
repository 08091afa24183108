//! Tolerant normalisation of inbound frames and the field extractors the
//! classifier rules are built on.
//!
//! The service sends objects, bare strings, strings holding JSON, and the odd
//! line of plain text. Everything becomes a [`Value`]: unparseable text is
//! wrapped as `{"Message": text}`, and a JSON string whose content is itself
//! JSON is parsed once more.

use serde_json::{Map, Value};

/// Field holding a human-readable message or status marker.
pub const MESSAGE_FIELD: &str = "Message";
/// Field holding the number of enrolled participants.
pub const PARTICIPANTS_FIELD: &str = "ParticipantsEnrolled";
/// Field holding a device serial number.
pub const SERIAL_FIELD: &str = "SerialNumber";
/// Fields any of which marks a signed transaction.
pub const TX_HASH_FIELDS: [&str; 5] = ["TxHash", "txHash", "txid", "TxId", "TransactionId"];

/// Parse a raw text frame into a JSON value, never failing.
pub fn normalize(text: &str) -> Value {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => return wrap_message(text),
    };
    match value {
        Value::String(inner) if looks_like_json(&inner) => {
            serde_json::from_str(&inner).unwrap_or(Value::String(inner))
        }
        other => other,
    }
}

fn wrap_message(text: &str) -> Value {
    let mut map = Map::new();
    let _ = map.insert(MESSAGE_FIELD.to_owned(), Value::String(text.to_owned()));
    Value::Object(map)
}

fn looks_like_json(s: &str) -> bool {
    let s = s.trim();
    (s.starts_with('{') && s.ends_with('}'))
        || (s.starts_with('[') && s.ends_with(']'))
        || (s.len() >= 2 && s.starts_with('"') && s.ends_with('"'))
}

// ─── Extractors ──────────────────────────────────────────────────────────────

/// Message text: the frame itself when it is a string, else its `Message`
/// field. Trimmed.
pub fn message_text(value: &Value) -> Option<&str> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get(MESSAGE_FIELD)?.as_str()?,
        _ => return None,
    };
    Some(raw.trim())
}

/// `ParticipantsEnrolled` when it is a non-negative integer.
pub fn participants_enrolled(value: &Value) -> Option<u64> {
    value.get(PARTICIPANTS_FIELD)?.as_u64()
}

/// Non-empty `SerialNumber` string.
pub fn serial_number(value: &Value) -> Option<&str> {
    value
        .get(SERIAL_FIELD)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Whether any transaction-hash field is present and non-null.
pub fn has_tx_hash_field(value: &Value) -> bool {
    TX_HASH_FIELDS
        .iter()
        .any(|f| value.get(f).is_some_and(|v| !v.is_null()))
}

/// First transaction-hash field holding a string.
pub fn tx_hash(value: &Value) -> Option<&str> {
    TX_HASH_FIELDS
        .iter()
        .find_map(|f| value.get(f).and_then(Value::as_str))
}

/// String field `name` on an object frame.
pub fn str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}
