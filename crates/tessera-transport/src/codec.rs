//! Encode/decode hooks.
//!
//! The transport never interprets payloads itself. A [`Codec`] turns outbound
//! [`Envelope`]s into wire text and inbound wire text into [`Inbound`] frames
//! whose `kind` drives type-subscribed dispatch.

use serde_json::Value;

use crate::envelope::{Envelope, Inbound};
use crate::error::CodecError;

/// Wire encoding used by a [`Transport`](crate::Transport).
pub trait Codec: Send + Sync + 'static {
    /// Typed view of a decoded inbound frame.
    type Event: Clone + Send + Sync + 'static;

    /// Serialize an outbound envelope to a text frame.
    fn encode(&self, envelope: &Envelope) -> Result<String, CodecError>;

    /// Decode one inbound text frame.
    fn decode(&self, text: &str) -> Result<Inbound<Self::Event>, CodecError>;
}

/// Plain envelope codec: `{type, id?, replyTo?, payload?, error?}` in both
/// directions. The event body is the envelope payload (`null` when absent).
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvelopeCodec;

impl Codec for EnvelopeCodec {
    type Event = Value;

    fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        serde_json::to_string(envelope).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<Inbound<Value>, CodecError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(Inbound {
            kind: envelope.kind,
            id: envelope.id,
            reply_to: envelope.reply_to,
            error: envelope.error,
            body: envelope.payload.unwrap_or(Value::Null),
        })
    }
}
