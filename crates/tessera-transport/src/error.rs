//! Transport error types.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::ErrorBody;

/// Code written into synthesized error replies when a handler gives none.
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";

/// Errors surfaced by [`Transport`](crate::Transport) operations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TransportError {
    /// An operation that needs an open socket was attempted while not connected.
    #[error("not connected")]
    NotConnected,

    /// The socket closed while the call was outstanding.
    #[error("socket closed: {reason}")]
    ConnectionClosed {
        /// Close reason, or a description of what ended the socket.
        reason: String,
    },

    /// Opening the socket failed.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// The URL that was dialled (token redacted).
        url: String,
        /// Why the handshake failed.
        reason: String,
    },

    /// The configured URL could not be parsed.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The token provider failed.
    #[error("failed to obtain auth token: {0}")]
    Auth(String),

    /// No reply arrived before the deadline.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
        /// What we were waiting for.
        context: String,
    },

    /// The reply envelope carried a structured error.
    #[error("protocol error{}: {message}", code_suffix(.code))]
    Protocol {
        /// Machine-readable code, if the peer supplied one.
        code: Option<String>,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },

    /// An inbound frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// An outbound message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
}

impl TransportError {
    /// Whether this error means the connection went away (as opposed to a
    /// protocol-level failure on a live connection).
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::NotConnected | Self::ConnectionClosed { .. } | Self::Connect { .. })
    }

    /// Whether this error is a request or wait deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

impl From<ErrorBody> for TransportError {
    fn from(body: ErrorBody) -> Self {
        Self::Protocol {
            code: body.code,
            message: body.message,
            details: body.details,
        }
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Decode(msg) => Self::Decode(msg),
            CodecError::Encode(msg) => Self::Encode(msg),
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

/// Failures of the encode/decode hooks.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Inbound frame rejected.
    #[error("{0}")]
    Decode(String),
    /// Outbound message rejected.
    #[error("{0}")]
    Encode(String),
}

/// Failure returned by a type-subscribed handler.
///
/// When the frame that triggered the handler carried a request id, the
/// transport turns this into an error reply for the peer.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{message}")]
pub struct HandlerError {
    /// Optional machine-readable code (defaults to [`HANDLER_ERROR`] on the wire).
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Value>,
}

impl HandlerError {
    /// Handler error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    /// Attach a machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Wire body for the synthesized error reply.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: Some(self.code.clone().unwrap_or_else(|| HANDLER_ERROR.to_owned())),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}
