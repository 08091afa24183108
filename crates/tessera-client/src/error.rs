//! Workflow error types.

use tessera_settings::SettingsError;
use tessera_transport::TransportError;
use thiserror::Error;

/// Errors from workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The connection failed, closed, or was not open.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No completion event arrived before the operation's deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// A completion arrived under an awaited type but classified as
    /// something else.
    #[error("{operation} completed with unexpected {kind} event")]
    UnexpectedEvent {
        /// Operation name.
        operation: String,
        /// Classified kind of the event.
        kind: String,
    },

    /// No participant with this name in the session.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Settings could not be turned into clients.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl WorkflowError {
    /// Whether the operation failed because its deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Whether the connection went away, as opposed to a protocol-level
    /// failure. Callers decide from this whether to reconnect and retry.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_connection_loss())
    }
}

/// Result alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = WorkflowError::Timeout {
            operation: "enroll".into(),
            timeout_ms: 200_000,
        };
        assert_eq!(err.to_string(), "enroll timed out after 200000ms");
        assert!(err.is_timeout());
        assert!(!err.is_connection_loss());
    }

    #[test]
    fn transport_errors_are_classified() {
        let closed = WorkflowError::from(TransportError::ConnectionClosed {
            reason: "gone".into(),
        });
        assert!(closed.is_connection_loss());
        assert!(!closed.is_timeout());

        let protocol = WorkflowError::from(TransportError::Protocol {
            code: Some("E".into()),
            message: "bad".into(),
            details: None,
        });
        assert!(!protocol.is_connection_loss());
    }

    #[test]
    fn unknown_device_display() {
        assert_eq!(
            WorkflowError::UnknownDevice("C".into()).to_string(),
            "unknown device: C"
        );
    }
}
