//! Reconnect backoff configuration and delay calculation.
//!
//! The delay for zero-based attempt `k` is
//! `min(max_delay, base_delay * 2^k) + jitter`, where the jitter is drawn
//! uniformly from `[0, max_jitter)`. With the defaults that gives
//! `[min(30000, 500 * 2^k), min(30000, 500 * 2^k) + 250)` milliseconds.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum (pre-jitter) delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default exclusive upper bound of the additive jitter in milliseconds.
pub const DEFAULT_MAX_JITTER_MS: u64 = 250;

/// Parameters for reconnect backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay for the first attempt, doubled on each following attempt.
    pub base_delay_ms: u64,
    /// Cap applied before jitter.
    pub max_delay_ms: u64,
    /// Exclusive upper bound of the random additive jitter. Zero disables it.
    pub max_jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_jitter_ms: DEFAULT_MAX_JITTER_MS,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (zero-based), jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.max_jitter_ms)
        };
        Duration::from_millis(self.delay_with_jitter(attempt, jitter))
    }

    /// Deterministic variant of [`delay`](Self::delay) with the jitter supplied
    /// by the caller. `jitter_ms` is clamped below `max_jitter_ms`.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> u64 {
        let capped = calculate_backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms);
        let jitter = jitter_ms.min(self.max_jitter_ms.saturating_sub(1));
        capped.saturating_add(jitter)
    }
}

/// Capped exponential delay without jitter: `min(max_delay, base * 2^attempt)`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    exponential.min(max_delay_ms)
}
