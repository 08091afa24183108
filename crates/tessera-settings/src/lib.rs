//! # tessera-settings
//!
//! Configuration for Tessera clients, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`TesseraSettings::default()`]
//! 2. **User file**: `~/.tessera/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TESSERA_*` overrides (highest priority)
//!
//! There is no process-wide settings instance. Callers load settings once and
//! pass them to the clients they build.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, load_with_env,
    settings_path,
};
pub use types::{
    DeviceSettings, EndpointSettings, LoggingSettings, TesseraSettings, TransportSettings,
    WorkflowSettings,
};
