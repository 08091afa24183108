//! One coordinator client plus one client per signing device.

use std::path::Path;

use futures::future::join_all;
use tessera_settings::{SettingsError, TesseraSettings, load_settings, load_settings_from_path};
use tracing::{info, warn};

use crate::client::WorkflowClient;
use crate::config::ClientConfig;
use crate::error::{Result, WorkflowError};

/// Participant name of the coordinator client.
pub const MANAGER_NAME: &str = "manager";

/// The clients taking part in one enrollment or signing session.
///
/// Each client owns its own connection; nothing is shared between them, so
/// a slow or failed device never blocks the others.
#[derive(Debug)]
pub struct SigningSession {
    manager: WorkflowClient,
    devices: Vec<WorkflowClient>,
}

impl SigningSession {
    /// Session from ready-made clients. Device order is kept.
    pub fn new(manager: WorkflowClient, devices: Vec<WorkflowClient>) -> Result<Self> {
        for (i, device) in devices.iter().enumerate() {
            if devices[..i].iter().any(|d| d.name() == device.name()) {
                return Err(WorkflowError::Settings(SettingsError::InvalidValue(format!(
                    "duplicate device name '{}'",
                    device.name()
                ))));
            }
        }
        Ok(Self { manager, devices })
    }

    /// Load `~/.tessera/settings.json`, install logging as configured, and
    /// build the session from the result.
    pub fn load() -> Result<Self> {
        Self::start(load_settings()?)
    }

    /// Like [`load`](Self::load), reading settings from `path`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::start(load_settings_from_path(path)?)
    }

    fn start(settings: TesseraSettings) -> Result<Self> {
        settings.logging.init();
        let session = Self::from_settings(&settings)?;
        info!(
            manager = %settings.manager.url,
            devices = session.devices.len(),
            "session configured"
        );
        Ok(session)
    }

    /// Unconnected clients for the manager and every configured device.
    pub fn from_settings(settings: &TesseraSettings) -> Result<Self> {
        settings.validate()?;
        let manager = WorkflowClient::new(ClientConfig::from_settings(
            MANAGER_NAME,
            &settings.manager.url,
            settings.manager.token.as_deref(),
            settings,
        ));
        let devices = settings
            .devices
            .iter()
            .map(|d| {
                WorkflowClient::new(ClientConfig::from_settings(
                    d.name.as_str(),
                    &d.url,
                    d.token.as_deref(),
                    settings,
                ))
            })
            .collect();
        Ok(Self { manager, devices })
    }

    /// Coordinator client.
    pub fn manager(&self) -> &WorkflowClient {
        &self.manager
    }

    /// Device client by participant name.
    pub fn device(&self, name: &str) -> Result<&WorkflowClient> {
        self.devices
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| WorkflowError::UnknownDevice(name.to_owned()))
    }

    /// Device clients in configuration order.
    pub fn devices(&self) -> &[WorkflowClient] {
        &self.devices
    }

    fn all(&self) -> impl Iterator<Item = &WorkflowClient> {
        std::iter::once(&self.manager).chain(&self.devices)
    }

    /// Connect every client concurrently. Every attempt runs to completion;
    /// the first failure, in manager-then-device order, is returned.
    pub async fn connect_all(&self) -> Result<()> {
        let results = join_all(self.all().map(|c| c.connect())).await;
        let mut first_err = None;
        for (client, result) in self.all().zip(results) {
            if let Err(e) = result {
                warn!(participant = %client.name(), error = %e, "connect failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                info!(devices = self.devices.len(), "session connected");
                Ok(())
            }
        }
    }

    /// Close every client concurrently.
    pub async fn close_all(&self) {
        let _ = join_all(self.all().map(|c| c.close())).await;
        info!("session closed");
    }

    /// Names of the clients that are currently connected.
    pub fn connected(&self) -> Vec<&str> {
        self.all()
            .filter(|c| c.is_connected())
            .map(WorkflowClient::name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tessera_settings::DeviceSettings;

    use super::*;

    fn settings() -> TesseraSettings {
        let mut s = TesseraSettings::default();
        s.manager.url = "ws://127.0.0.1:9/manager".into();
        s.devices = vec![
            DeviceSettings {
                name: "A".into(),
                url: "ws://127.0.0.1:9/a".into(),
                token: None,
            },
            DeviceSettings {
                name: "B".into(),
                url: "ws://127.0.0.1:9/b".into(),
                token: Some("t".into()),
            },
        ];
        s
    }

    #[test]
    fn builds_one_client_per_device() {
        let session = SigningSession::from_settings(&settings()).unwrap();
        assert_eq!(session.manager().name(), MANAGER_NAME);
        let names: Vec<_> = session.devices().iter().map(WorkflowClient::name).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(
            session.device("B").unwrap().transport().config().url,
            "ws://127.0.0.1:9/b"
        );
        assert!(session.connected().is_empty());
    }

    #[test]
    fn unknown_device_is_an_error() {
        let session = SigningSession::from_settings(&settings()).unwrap();
        assert_matches!(session.device("C"), Err(WorkflowError::UnknownDevice(name)) if name == "C");
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut s = settings();
        s.devices[1].name = "A".into();
        assert_matches!(
            SigningSession::from_settings(&s),
            Err(WorkflowError::Settings(_))
        );
    }

    #[test]
    fn load_from_path_reads_the_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "manager": {"url": "ws://127.0.0.1:9/manager"},
                "devices": [{"name": "A", "url": "ws://127.0.0.1:9/a"}],
                "logging": {"level": "warn"}
            }"#,
        )
        .unwrap();

        let session = SigningSession::load_from_path(&path).unwrap();
        assert_eq!(
            session.manager().transport().config().url,
            "ws://127.0.0.1:9/manager"
        );
        assert_eq!(session.devices().len(), 1);
        assert!(session.device("A").is_ok());
    }

    #[test]
    fn load_from_path_rejects_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"manager": {"url": "http://nope"}}"#).unwrap();
        assert_matches!(
            SigningSession::load_from_path(&path),
            Err(WorkflowError::Settings(_))
        );
    }

    #[test]
    fn new_rejects_duplicate_names() {
        let client = |name: &str| WorkflowClient::new(ClientConfig::new(name, "ws://127.0.0.1:9/ws"));
        let err = SigningSession::new(client(MANAGER_NAME), vec![client("A"), client("A")]);
        assert_matches!(err, Err(WorkflowError::Settings(_)));
    }
}
