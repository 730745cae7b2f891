//! Layered settings loading: defaults, then the JSON file, then `TETHER_*`
//! environment variables.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::ClientSettings;

/// Overrides the settings file location.
pub const SETTINGS_PATH_ENV: &str = "TETHER_SETTINGS";

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value (arrays included)
/// replaces the base value. `null` in the overlay leaves the base untouched.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Default settings file: `$TETHER_SETTINGS`, else `~/.tether/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load from [`settings_path`] with environment overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides. A missing file yields the
/// defaults.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;
    let merged = match std::fs::read_to_string(path) {
        Ok(contents) => {
            let file: Value = serde_json::from_str(&contents)?;
            tracing::debug!(?path, "loaded settings file");
            deep_merge(defaults, file)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: ClientSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate();
    Ok(settings)
}

/// Apply `TETHER_*` overrides using `lookup` to read variables.
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("TETHER_URL") {
        settings.url = Some(url);
    }
    if let Some(transport) = lookup("TETHER_TRANSPORT") {
        settings.transport = transport;
    }
    if let Some(value) = lookup("TETHER_SKIP_NEGOTIATION") {
        match parse_bool(&value) {
            Some(skip) => settings.skip_negotiation = skip,
            None => tracing::warn!(value = %value, "ignoring invalid TETHER_SKIP_NEGOTIATION"),
        }
    }
    if let Some(value) = lookup("TETHER_HANDSHAKE_TIMEOUT_MS") {
        match value.trim().parse() {
            Ok(ms) => settings.handshake_timeout_ms = ms,
            Err(_) => tracing::warn!(value = %value, "ignoring invalid TETHER_HANDSHAKE_TIMEOUT_MS"),
        }
    }
    if let Some(value) = lookup("TETHER_RECONNECT") {
        match parse_bool(&value) {
            Some(enabled) => settings.reconnect.enabled = enabled,
            None => tracing::warn!(value = %value, "ignoring invalid TETHER_RECONNECT"),
        }
    }
    if let Some(level) = lookup("TETHER_LOG_LEVEL") {
        settings.logging.level = level;
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── deep_merge ──

    #[test]
    fn merge_nested_objects() {
        let merged = deep_merge(
            json!({"reconnect": {"enabled": false, "delaysMs": [0, 1]}, "transport": "auto"}),
            json!({"reconnect": {"enabled": true}}),
        );
        assert_eq!(merged["reconnect"]["enabled"], true);
        assert_eq!(merged["reconnect"]["delaysMs"], json!([0, 1]));
        assert_eq!(merged["transport"], "auto");
    }

    #[test]
    fn merge_replaces_arrays_and_ignores_null() {
        let merged = deep_merge(
            json!({"delaysMs": [0, 1, 2], "url": "http://a"}),
            json!({"delaysMs": [5], "url": null}),
        );
        assert_eq!(merged["delaysMs"], json!([5]));
        assert_eq!(merged["url"], "http://a");
    }

    // ── File loading ──

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.max_redirects, ClientSettings::default().max_redirects);
    }

    #[test]
    fn file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"url": "https://example.com/hub", "reconnect": {"enabled": true}, "headers": {"x-app": "cli"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.url.as_deref(), Some("https://example.com/hub"));
        assert!(settings.reconnect.enabled);
        assert_eq!(settings.reconnect.delays_ms, vec![0, 2_000, 10_000, 30_000]);
        assert_eq!(settings.headers.get("x-app").map(String::as_str), Some("cli"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_settings_from_path(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn loaded_values_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"transport": "Smoke Signals", "pollTimeoutMs": 0}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.transport, "auto");
        assert_eq!(settings.poll_timeout_ms, 100_000);
    }

    // ── Environment overrides ──

    #[test]
    fn env_overrides_apply() {
        let mut settings = ClientSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("TETHER_URL", "http://localhost:5000/chat"),
                ("TETHER_TRANSPORT", "WebSockets"),
                ("TETHER_SKIP_NEGOTIATION", "true"),
                ("TETHER_HANDSHAKE_TIMEOUT_MS", "2500"),
                ("TETHER_RECONNECT", "on"),
                ("TETHER_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.url.as_deref(), Some("http://localhost:5000/chat"));
        assert_eq!(settings.transport, "WebSockets");
        assert!(settings.skip_negotiation);
        assert_eq!(settings.handshake_timeout_ms, 2_500);
        assert!(settings.reconnect.enabled);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = ClientSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("TETHER_SKIP_NEGOTIATION", "maybe"),
                ("TETHER_HANDSHAKE_TIMEOUT_MS", "soon"),
            ]),
        );
        assert!(!settings.skip_negotiation);
        assert_eq!(settings.handshake_timeout_ms, 15_000);
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("2"), None);
    }
}
