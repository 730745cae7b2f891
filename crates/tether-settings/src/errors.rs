//! Settings error type.

use std::path::PathBuf;

/// Failure to load a settings file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file (or the merged document) is not valid settings JSON.
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
