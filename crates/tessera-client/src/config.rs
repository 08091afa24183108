//! Client configuration and conversion from loaded settings.

use std::time::Duration;

use tessera_settings::{TesseraSettings, TransportSettings, WorkflowSettings};
use tessera_transport::{HeartbeatConfig, ReconnectPolicy, TransportConfig};

/// Deadlines and cadence for workflow operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// `request_manager_info` deadline.
    pub manager_info_timeout: Duration,
    /// `enroll` deadline.
    pub enroll_timeout: Duration,
    /// `sign` deadline.
    pub sign_timeout: Duration,
    /// `check_pin` deadline.
    pub check_pin_timeout: Duration,
    /// `send_status` deadline.
    pub status_timeout: Duration,
    /// Default status polling interval.
    pub status_poll_interval: Duration,
    /// Default `wait_for` deadline.
    pub wait_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::from(&WorkflowSettings::default())
    }
}

impl From<&WorkflowSettings> for WorkflowConfig {
    fn from(s: &WorkflowSettings) -> Self {
        Self {
            manager_info_timeout: Duration::from_millis(s.manager_info_timeout_ms),
            enroll_timeout: Duration::from_millis(s.enroll_timeout_ms),
            sign_timeout: Duration::from_millis(s.sign_timeout_ms),
            check_pin_timeout: Duration::from_millis(s.check_pin_timeout_ms),
            status_timeout: Duration::from_millis(s.status_timeout_ms),
            status_poll_interval: Duration::from_millis(s.status_poll_interval_ms),
            wait_timeout: Duration::from_millis(s.wait_timeout_ms),
        }
    }
}

/// Everything needed to build one [`WorkflowClient`](crate::WorkflowClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Participant name used in logs and session lookups.
    pub name: String,
    /// Socket settings.
    pub transport: TransportConfig,
    /// Operation deadlines.
    pub workflow: WorkflowConfig,
    /// Static auth token, if the endpoint needs one.
    pub token: Option<String>,
}

impl ClientConfig {
    /// Default settings for `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::new(url),
            workflow: WorkflowConfig::default(),
            token: None,
        }
    }

    /// Replace the operation deadlines.
    #[must_use]
    pub fn with_workflow(mut self, workflow: WorkflowConfig) -> Self {
        self.workflow = workflow;
        self
    }

    /// Replace the socket settings.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Attach a static auth token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Config for one endpoint out of loaded settings.
    pub fn from_settings(
        name: impl Into<String>,
        url: &str,
        token: Option<&str>,
        settings: &TesseraSettings,
    ) -> Self {
        Self {
            name: name.into(),
            transport: transport_config(url, &settings.transport),
            workflow: WorkflowConfig::from(&settings.workflow),
            token: token.map(str::to_owned),
        }
    }
}

/// [`TransportConfig`] for `url` from socket settings.
pub fn transport_config(url: &str, s: &TransportSettings) -> TransportConfig {
    TransportConfig {
        url: url.to_owned(),
        token_query_param: s.token_query_param.clone(),
        request_timeout: Duration::from_millis(s.request_timeout_ms),
        heartbeat: HeartbeatConfig {
            interval: Duration::from_millis(s.heartbeat_interval_ms),
        },
        reconnect: ReconnectPolicy {
            auto_reconnect: s.auto_reconnect,
            max_attempts: s.max_reconnect_attempts,
            backoff: s.backoff,
        },
        tolerant_decode: s.tolerant_decode,
    }
}
