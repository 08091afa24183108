//! Envelope wire types for the transport's own request/response layer.
//!
//! Outbound: `{type, id?, payload?}`. Replies: `{type: "<type>:REPLY",
//! replyTo, payload?, error?}`. Peers are not required to speak this shape;
//! a [`Codec`](crate::Codec) decides what inbound frames mean.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix appended to the original type on reply envelopes.
pub const REPLY_SUFFIX: &str = ":REPLY";

/// Type of the keep-alive message sent by the heartbeat.
pub const PING_TYPE: &str = "ping";

/// Generic message envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Request id; present when the sender expects a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Id of the request this envelope answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Structured error, on failed replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    /// Fire-and-forget message.
    pub fn event(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            reply_to: None,
            payload,
            error: None,
        }
    }

    /// Request expecting a reply correlated by `id`.
    pub fn request(kind: impl Into<String>, id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::event(kind, payload)
        }
    }

    /// Error reply to the request `id` of type `original_kind`.
    pub fn error_reply(original_kind: &str, id: impl Into<String>, error: ErrorBody) -> Self {
        Self {
            kind: format!("{original_kind}{REPLY_SUFFIX}"),
            id: None,
            reply_to: Some(id.into()),
            payload: None,
            error: Some(error),
        }
    }

    /// Whether this envelope answers an earlier request. Replies are never
    /// themselves replied to.
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// Structured error carried by a reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    /// Error body with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }
}

/// A decoded inbound frame, as produced by a codec.
///
/// `kind` selects the subscribers; `body` is the codec's typed view of the
/// frame. `id`/`reply_to`/`error` drive correlation and auto-replies.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound<E> {
    /// Event type used for subscription dispatch.
    pub kind: String,
    /// Request id, when the peer expects a reply.
    pub id: Option<String>,
    /// Id of the local request this frame answers.
    pub reply_to: Option<String>,
    /// Structured error on a failed reply.
    pub error: Option<ErrorBody>,
    /// Decoded body.
    pub body: E,
}

impl<E> Inbound<E> {
    /// Inbound event with no correlation fields.
    pub fn event(kind: impl Into<String>, body: E) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            reply_to: None,
            error: None,
            body,
        }
    }

    /// Whether the peer expects a reply to this frame.
    pub fn expects_reply(&self) -> bool {
        self.id.is_some() && self.reply_to.is_none()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn event_omits_empty_fields() {
        let env = Envelope::event(PING_TYPE, None);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v, json!({"type": "ping"}));
    }

    #[test]
    fn request_carries_id_and_payload() {
        let env = Envelope::request("Sign", "17-1", Some(json!({"tx": "ab"})));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "Sign");
        assert_eq!(v["id"], "17-1");
        assert_eq!(v["payload"]["tx"], "ab");
        assert!(!env.is_reply());
    }

    #[test]
    fn error_reply_shape() {
        let env = Envelope::error_reply("Sign", "17-1", ErrorBody::new("boom"));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "Sign:REPLY");
        assert_eq!(v["replyTo"], "17-1");
        assert_eq!(v["error"]["message"], "boom");
        assert!(v.get("id").is_none());
        assert!(env.is_reply());
    }

    #[test]
    fn parses_reply_with_error() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"Sign:REPLY","replyTo":"9-3","error":{"code":"E1","message":"bad","details":{"n":1}}}"#,
        )
        .unwrap();
        assert_eq!(env.reply_to.as_deref(), Some("9-3"));
        let err = env.error.unwrap();
        assert_eq!(err.code.as_deref(), Some("E1"));
        assert_eq!(err.details, Some(json!({"n": 1})));
    }

    #[test]
    fn inbound_expects_reply_only_for_requests() {
        let mut inbound = Inbound::event("Status", ());
        assert!(!inbound.expects_reply());
        inbound.id = Some("1".into());
        assert!(inbound.expects_reply());
        inbound.reply_to = Some("2".into());
        assert!(!inbound.expects_reply());
    }
}
