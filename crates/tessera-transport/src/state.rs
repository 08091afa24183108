//! Connection state machine and lifecycle events.

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;

/// Connection state of one transport.
///
/// `Disconnected → Connecting → Connected`; a close moves `Connected →
/// Disconnected` directly, and `Reconnecting` covers the backoff wait when
/// auto-reconnect applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// `close()` was called and teardown is in progress.
    Closing,
}

impl ConnectionState {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events delivered to lifecycle listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// Socket opened.
    Connected,
    /// Socket closed.
    Disconnected {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason or a description of the failure.
        reason: String,
    },
    /// A reconnect is scheduled.
    Reconnecting {
        /// Zero-based attempt number.
        attempt: u32,
        /// Backoff delay before the attempt.
        delay: Duration,
    },
    /// Non-fatal failure: decode errors, failed reconnect attempts.
    Error(TransportError),
}

impl LifecycleEvent {
    /// The listener table key for this event.
    pub fn kind(&self) -> LifecycleKind {
        match self {
            Self::Connected => LifecycleKind::Connected,
            Self::Disconnected { .. } => LifecycleKind::Disconnected,
            Self::Reconnecting { .. } => LifecycleKind::Reconnecting,
            Self::Error(_) => LifecycleKind::Error,
        }
    }
}

/// Lifecycle event names listeners subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// `connected`
    Connected,
    /// `disconnected`
    Disconnected,
    /// `reconnecting`
    Reconnecting,
    /// `error`
    Error,
}

impl LifecycleKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}
