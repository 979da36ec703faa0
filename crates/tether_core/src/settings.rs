//! Bridge settings

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    /// Name given to the event-loop thread spawned by [`crate::Bridge::start`].
    pub loop_thread_name: String,
    /// Maximum tracing level installed by the binary.
    pub log_level: String,
    /// Emit a trace event for every value fold created or destroyed.
    pub trace_values: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            loop_thread_name: "tether-gui".to_string(),
            log_level: "info".to_string(),
            trace_values: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

impl BridgeSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}
