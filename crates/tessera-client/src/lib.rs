//! # tessera-client
//!
//! Workflow layer for multi-party hardware enrollment and signing.
//!
//! - [`WorkflowClient`]: one connection, typed operations that send a request
//!   and wait for the first of a fixed set of completion events
//! - [`EventWait`]: the first-event-wins combinator those operations use
//! - [`spawn_poller`]: fixed-interval status polling while connected
//! - [`SigningSession`]: the coordinator client plus one client per device

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod polling;
pub mod session;
pub mod wait;

pub use client::{PinCheck, WaitOutcome, WorkflowClient};
pub use config::{ClientConfig, WorkflowConfig, transport_config};
pub use error::{Result, WorkflowError};
pub use polling::{PollCancel, PollingHandle, spawn_poller};
pub use session::{MANAGER_NAME, SigningSession};
pub use wait::{Completion, EventWait};
