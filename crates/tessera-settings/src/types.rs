//! Settings types.
//!
//! Every struct deserializes from camelCase JSON with `#[serde(default)]`, so
//! a settings file only needs the keys it changes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tessera_core::BackoffConfig;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TesseraSettings {
    /// Coordinator endpoint.
    pub manager: EndpointSettings,
    /// Signing devices, one connection each.
    pub devices: Vec<DeviceSettings>,
    /// Socket behaviour shared by every connection.
    pub transport: TransportSettings,
    /// Per-operation deadlines and polling cadence.
    pub workflow: WorkflowSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TesseraSettings {
    /// Reject settings no client could run with.
    pub fn validate(&self) -> Result<()> {
        check_ws_url("manager.url", &self.manager.url)?;

        let mut seen = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            if device.name.trim().is_empty() {
                return Err(SettingsError::InvalidValue(format!("devices[{i}].name is empty")));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
            check_ws_url(&format!("devices[{i}].url"), &device.url)?;
        }

        if self.transport.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "transport.requestTimeoutMs must be positive".into(),
            ));
        }
        if self.workflow.status_poll_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "workflow.statusPollIntervalMs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Device entry by name.
    pub fn device(&self, name: &str) -> Option<&DeviceSettings> {
        self.devices.iter().find(|d| d.name == name)
    }
}

fn check_ws_url(field: &str, url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(SettingsError::InvalidValue(format!("{field} is empty")));
    }
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(SettingsError::InvalidValue(format!(
            "{field} must start with ws:// or wss://, got '{url}'"
        )));
    }
    Ok(())
}

/// A WebSocket endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// `ws://` or `wss://` URL.
    pub url: String,
    /// Auth token appended as a query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/manager".to_string(),
            token: None,
        }
    }
}

/// One signing device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    /// Participant name, unique within a session.
    pub name: String,
    /// `ws://` or `wss://` URL.
    pub url: String,
    /// Auth token appended as a query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Socket settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Default request deadline.
    pub request_timeout_ms: u64,
    /// Ping interval; `0` disables the heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Reconnect after unexpected closes.
    pub auto_reconnect: bool,
    /// Bound on consecutive reconnect attempts; absent means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
    /// Reconnect delay schedule.
    pub backoff: BackoffConfig,
    /// Drop malformed frames instead of closing the socket.
    pub tolerant_decode: bool,
    /// Query parameter carrying the auth token.
    pub token_query_param: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
            heartbeat_interval_ms: 0,
            auto_reconnect: true,
            max_reconnect_attempts: None,
            backoff: BackoffConfig::default(),
            tolerant_decode: true,
            token_query_param: "token".to_string(),
        }
    }
}

/// Per-operation deadlines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    /// Wait for coordinator info.
    pub manager_info_timeout_ms: u64,
    /// Wait for a device to finish enrolling.
    pub enroll_timeout_ms: u64,
    /// Wait for a signature.
    pub sign_timeout_ms: u64,
    /// Wait for the PIN check outcome.
    pub check_pin_timeout_ms: u64,
    /// Wait for one status reply.
    pub status_timeout_ms: u64,
    /// Status polling cadence.
    pub status_poll_interval_ms: u64,
    /// Default deadline for `wait_for`.
    pub wait_timeout_ms: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            manager_info_timeout_ms: 60_000,
            enroll_timeout_ms: 200_000,
            sign_timeout_ms: 300_000,
            check_pin_timeout_ms: 300_000,
            status_timeout_ms: 10_000,
            status_poll_interval_ms: 5_000,
            wait_timeout_ms: 300_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl LoggingSettings {
    /// Install the process-wide subscriber described by these settings.
    /// Later calls are no-ops.
    pub fn init(&self) {
        tessera_core::logging::init_from(&self.level, self.json);
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
