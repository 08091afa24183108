//! # tessera-core
//!
//! Foundation types shared by every Tessera crate:
//!
//! - **Backoff**: [`BackoffConfig`] and the capped exponential delay math used
//!   by the transport's reconnect loop
//! - **Ids**: [`ConnectionId`] (UUID v7) and [`RequestIdGenerator`] for
//!   per-connection unique request ids
//! - **Logging**: subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod ids;
pub mod logging;

pub use backoff::{BackoffConfig, calculate_backoff_delay};
pub use ids::{ConnectionId, RequestIdGenerator};
