//! # tether-settings
//!
//! Layered configuration for the Tether connection client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ClientSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` or `$TETHER_SETTINGS`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! Loaded values are validated: out-of-range or unparseable values are
//! corrected with a warning rather than rejected.
//!
//! ## Crate Position
//!
//! Depends on: tether-core.
//! Depended on by: tether-client, tether (binary).

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{ClientSettings, LoggingSettings, ReconnectSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ClientSettings::default();
        let path = settings_path();
        assert!(path.ends_with("settings.json") || std::env::var(loader::SETTINGS_PATH_ENV).is_ok());
    }

    #[test]
    fn deep_merge_re_exported() {
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
