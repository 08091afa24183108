//! # tessera-transport
//!
//! Message-oriented RPC over one persistent WebSocket:
//!
//! - **Connection**: connect/close, reconnect with capped exponential
//!   backoff, optional heartbeat pings
//! - **Requests**: unique ids, reply correlation, per-call deadlines, uniform
//!   rejection of everything in flight when the socket closes
//! - **Dispatch**: handlers subscribed by event type, lifecycle listeners,
//!   automatic error replies when a handler fails on a peer request
//!
//! The transport has no protocol knowledge. Frames are turned into
//! [`Inbound`] events by a [`Codec`].

#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod pending;
pub mod state;
pub mod transport;

pub use codec::{Codec, EnvelopeCodec};
pub use config::{
    HeartbeatConfig, ReconnectPolicy, StaticToken, TokenProvider, TransportConfig,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use envelope::{Envelope, ErrorBody, Inbound, REPLY_SUFFIX};
pub use error::{CodecError, HandlerError, TransportError};
pub use handlers::{LifecycleListener, Subscribe, Subscription, SubscriptionTable, TypeHandler};
pub use state::{ConnectionState, LifecycleEvent, LifecycleKind};
pub use tessera_core::BackoffConfig;
pub use transport::Transport;

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
