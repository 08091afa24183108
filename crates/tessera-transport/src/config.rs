//! Transport configuration and URL resolution.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::BackoffConfig;
use url::Url;

use crate::error::TransportError;

/// Default deadline for [`Transport::request`](crate::Transport::request).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Default query parameter carrying the auth token.
pub const DEFAULT_TOKEN_QUERY_PARAM: &str = "token";

/// Connection settings for one transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Query parameter the auth token is appended under.
    pub token_query_param: String,
    /// Default request deadline.
    pub request_timeout: Duration,
    /// Keep-alive settings.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Swallow malformed frames (surfaced as lifecycle `error` events) instead
    /// of ending the socket.
    pub tolerant_decode: bool,
}

impl TransportConfig {
    /// Defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token_query_param: DEFAULT_TOKEN_QUERY_PARAM.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectPolicy::default(),
            tolerant_decode: true,
        }
    }

    /// Set the heartbeat interval. Zero disables the heartbeat.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = HeartbeatConfig { interval };
        self
    }

    /// Replace the reconnection policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the default request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable or disable tolerant decoding.
    #[must_use]
    pub fn with_tolerant_decode(mut self, tolerant: bool) -> Self {
        self.tolerant_decode = tolerant;
        self
    }
}

/// Keep-alive ping settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Ping interval while connected. `Duration::ZERO` disables pings.
    pub interval: Duration,
}

impl HeartbeatConfig {
    /// Interval, or `None` when disabled.
    pub fn enabled_interval(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }
}

/// When and how often to reconnect after a socket closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect automatically after an unexpected close.
    pub auto_reconnect: bool,
    /// Upper bound on consecutive reconnect attempts. `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Delay schedule.
    pub backoff: BackoffConfig,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            auto_reconnect: false,
            ..Self::default()
        }
    }

    /// Whether attempt number `attempts` (count of attempts already made) is
    /// still allowed.
    pub fn allows(&self, attempts: u32) -> bool {
        self.auto_reconnect && self.max_attempts.is_none_or(|max| attempts < max)
    }
}

// ─── Auth tokens ─────────────────────────────────────────────────────────────

/// Source of the auth token appended to the connection URL.
///
/// Called on every connect, including reconnects, so providers may refresh.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token, or `None` to connect without one.
    async fn token(&self) -> Result<Option<String>, TransportError>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>, TransportError> {
        Ok(Some(self.0.clone()))
    }
}

/// Parse `base` and append `param=token` when a non-empty token is given.
pub fn resolve_url(base: &str, param: &str, token: Option<&str>) -> Result<Url, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidUrl {
        url: base.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidUrl {
                url: base.to_owned(),
                reason: format!("unsupported scheme '{other}'"),
            });
        }
    }
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let _ = url.query_pairs_mut().append_pair(param, token);
    }
    Ok(url)
}

/// URL with the value of `param` masked, for logs and errors.
pub fn redact_url(url: &Url, param: &str) -> String {
    if !url.query_pairs().any(|(k, _)| k == param) {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == param { "***".to_owned() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    let mut redacted = url.clone();
    let _ = redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
