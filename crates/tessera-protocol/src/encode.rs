//! Outbound encoding for the service's legacy dialect.
//!
//! Coordinator calls go out flattened as `{"Method": <type>, ...payload}`.
//! Everything else sends its payload unwrapped (strings verbatim), or the
//! whole envelope when there is no payload.

use serde_json::{Map, Value};
use tessera_transport::{CodecError, Envelope};

/// Outbound method names.
pub mod method {
    /// Ask the coordinator for session info; also used for status polls.
    pub const INFO_ENROLLMENT: &str = "Info_Enrollment";
    /// Enroll a device.
    pub const ENROLLMENT: &str = "Enrollment";
    /// Generic info request.
    pub const INFO: &str = "Info";
    /// Sign a transaction on a device.
    pub const SIGN: &str = "Sign";
    /// Verify the device PIN and read its serial.
    pub const CHECK_PIN: &str = "CheckPIN";
}

/// Key naming the call in a flattened frame.
pub const METHOD_FIELD: &str = "Method";
/// Key holding a non-object payload in a flattened frame.
pub const PAYLOAD_FIELD: &str = "Payload";

/// Types sent in the flattened `{Method, ...}` shape.
pub const FLATTENED_METHODS: [&str; 3] = [method::INFO_ENROLLMENT, method::ENROLLMENT, method::INFO];

/// Whether `kind` is sent flattened.
pub fn is_flattened(kind: &str) -> bool {
    FLATTENED_METHODS.contains(&kind)
}

/// Encode one outbound envelope as wire text.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    if is_flattened(&envelope.kind) {
        return to_text(&flatten(&envelope.kind, envelope.payload.as_ref()));
    }
    match &envelope.payload {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(payload) => to_text(payload),
        None => serde_json::to_string(envelope).map_err(|e| CodecError::Encode(e.to_string())),
    }
}

/// `{"Method": kind}` merged with the payload's fields. Payload fields win on
/// key collisions; a non-object payload is kept under `Payload`.
pub fn flatten(kind: &str, payload: Option<&Value>) -> Value {
    let mut frame = Map::new();
    let _ = frame.insert(METHOD_FIELD.to_owned(), Value::String(kind.to_owned()));
    match payload {
        None | Some(Value::Null) => {}
        Some(Value::Object(fields)) => {
            for (key, value) in fields {
                let _ = frame.insert(key.clone(), value.clone());
            }
        }
        Some(other) => {
            let _ = frame.insert(PAYLOAD_FIELD.to_owned(), other.clone());
        }
    }
    Value::Object(frame)
}

fn to_text(value: &Value) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
}
