//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TesseraSettings::default()`]
//! 2. If `~/.tessera/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TESSERA_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TesseraSettings;

/// Resolve the path to the settings file (`~/.tessera/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tessera").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TesseraSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error. The result is validated.
pub fn load_settings_from_path(path: &Path) -> Result<TesseraSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// [`load_settings_from_path`] with an explicit environment lookup.
pub fn load_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<TesseraSettings> {
    let defaults = serde_json::to_value(TesseraSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TesseraSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TESSERA_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TesseraSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `env`.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
pub fn apply_overrides(settings: &mut TesseraSettings, env: impl Fn(&str) -> Option<String>) {
    let reader = EnvReader { env };

    // ── Endpoints ───────────────────────────────────────────────────
    if let Some(v) = reader.string("TESSERA_MANAGER_URL") {
        settings.manager.url = v;
    }
    if let Some(v) = reader.string("TESSERA_MANAGER_TOKEN") {
        settings.manager.token = Some(v);
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = reader.u64("TESSERA_REQUEST_TIMEOUT_MS", 100, 3_600_000) {
        settings.transport.request_timeout_ms = v;
    }
    if let Some(v) = reader.u64("TESSERA_HEARTBEAT_INTERVAL_MS", 0, 600_000) {
        settings.transport.heartbeat_interval_ms = v;
    }
    if let Some(v) = reader.bool("TESSERA_AUTO_RECONNECT") {
        settings.transport.auto_reconnect = v;
    }
    if let Some(v) = reader.u32("TESSERA_MAX_RECONNECT_ATTEMPTS", 0, 1_000_000) {
        settings.transport.max_reconnect_attempts = Some(v);
    }
    if let Some(v) = reader.bool("TESSERA_TOLERANT_DECODE") {
        settings.transport.tolerant_decode = v;
    }

    // ── Workflow ────────────────────────────────────────────────────
    if let Some(v) = reader.u64("TESSERA_STATUS_POLL_INTERVAL_MS", 100, 3_600_000) {
        settings.workflow.status_poll_interval_ms = v;
    }
    if let Some(v) = reader.u64("TESSERA_WAIT_TIMEOUT_MS", 1_000, 86_400_000) {
        settings.workflow.wait_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = reader.string("TESSERA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = reader.bool("TESSERA_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    env: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = (self.env)(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.env)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_settings(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = json!({"transport": {"requestTimeoutMs": 15000, "autoReconnect": true}});
        let source = json!({"transport": {"requestTimeoutMs": 5000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["transport"]["requestTimeoutMs"], 5000);
        assert_eq!(merged["transport"]["autoReconnect"], true);
    }

    #[test]
    fn merge_array_replace() {
        let target = json!({"devices": [{"name": "A"}, {"name": "B"}]});
        let source = json!({"devices": [{"name": "C"}]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["devices"], json!([{"name": "C"}]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1, "b": 2}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"nested": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── load_with_env ───────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with_env(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, TesseraSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let (_dir, path) = write_settings(
            r#"{
                "manager": {"url": "wss://coord.example/ws", "token": "t"},
                "devices": [{"name": "A", "url": "ws://10.0.0.2:9000"}],
                "transport": {"heartbeatIntervalMs": 25000, "backoff": {"baseDelayMs": 250}},
                "workflow": {"signTimeoutMs": 120000}
            }"#,
        );
        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.manager.url, "wss://coord.example/ws");
        assert_eq!(settings.manager.token.as_deref(), Some("t"));
        assert_eq!(settings.devices.len(), 1);
        assert_eq!(settings.transport.heartbeat_interval_ms, 25_000);
        assert_eq!(settings.transport.backoff.base_delay_ms, 250);
        assert_eq!(settings.transport.backoff.max_delay_ms, 30_000);
        assert_eq!(settings.workflow.sign_timeout_ms, 120_000);
        assert_eq!(settings.workflow.enroll_timeout_ms, 200_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let (_dir, path) = write_settings("not valid json");
        assert!(matches!(
            load_with_env(&path, no_env).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    #[test]
    fn load_runs_validation() {
        let (_dir, path) = write_settings(
            r#"{"devices": [{"name": "A", "url": "ws://a"}, {"name": "A", "url": "ws://b"}]}"#,
        );
        assert!(matches!(
            load_with_env(&path, no_env).unwrap_err(),
            SettingsError::InvalidValue(_)
        ));
    }

    #[test]
    fn env_overrides_file() {
        let (_dir, path) = write_settings(r#"{"transport": {"requestTimeoutMs": 5000}}"#);
        let env = env_of(&[
            ("TESSERA_REQUEST_TIMEOUT_MS", "7000"),
            ("TESSERA_MANAGER_URL", "ws://override/ws"),
            ("TESSERA_AUTO_RECONNECT", "off"),
            ("TESSERA_MAX_RECONNECT_ATTEMPTS", "3"),
            ("TESSERA_LOG_JSON", "yes"),
        ]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.transport.request_timeout_ms, 7000);
        assert_eq!(settings.manager.url, "ws://override/ws");
        assert!(!settings.transport.auto_reconnect);
        assert_eq!(settings.transport.max_reconnect_attempts, Some(3));
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = TesseraSettings::default();
        apply_overrides(
            &mut settings,
            env_of(&[
                ("TESSERA_REQUEST_TIMEOUT_MS", "fast"),
                ("TESSERA_HEARTBEAT_INTERVAL_MS", "9999999"),
                ("TESSERA_TOLERANT_DECODE", "maybe"),
                ("TESSERA_LOG_LEVEL", ""),
            ]),
        );
        assert_eq!(settings, TesseraSettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "off", "FALSE", "No"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("0", 0, 600_000), Some(0));
        assert_eq!(parse_u64_range("600001", 0, 600_000), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
        assert_eq!(parse_u32_range("3", 0, 10), Some(3));
        assert_eq!(parse_u32_range("-1", 0, 10), None);
    }

    #[test]
    fn settings_path_ends_with_tessera_dir() {
        let path = settings_path();
        assert!(path.ends_with(".tessera/settings.json"));
    }
}
