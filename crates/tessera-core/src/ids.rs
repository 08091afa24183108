//! Identifier types.
//!
//! [`ConnectionId`] tags every log line a transport emits. Request ids come
//! from a [`RequestIdGenerator`] owned by one transport: a monotonic counter
//! prefixed with the wall-clock millisecond at which the id was minted, so ids
//! never repeat for the lifetime of the connection (or across reconnects of the
//! same transport).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one transport instance (UUID v7, time-ordered).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mints unique request ids of the form `<timestamp-ms>-<counter>`.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a generator whose counter starts at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next id.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let ts = chrono::Utc::now().timestamp_millis();
        format!("{ts}-{n}")
    }

    /// Number of ids minted so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
