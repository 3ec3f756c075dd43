//! Settings persisted as JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::XdgDirs;
use crate::history::DEFAULT_INVISIBLE_TAB_LIMIT;
use crate::messaging::DEFAULT_CHANNEL_CAPACITY;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Messages kept for each hidden tab.
    pub invisible_tab_limit: usize,
    /// Buffer of the async event stream.
    pub event_channel_capacity: usize,
    /// Fail executions running longer than this. Unset means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_timeout_secs: Option<u64>,
    /// Tab used when none is given.
    pub default_tab: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            invisible_tab_limit: DEFAULT_INVISIBLE_TAB_LIMIT,
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            execution_timeout_secs: None,
            default_tab: "main".to_string(),
        }
    }
}

impl Settings {
    /// Load from the XDG config file.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&XdgDirs::new().config_file())
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.invisible_tab_limit, 5);
        assert_eq!(settings.event_channel_capacity, 256);
        assert!(settings.execution_timeout().is_none());
        assert_eq!(settings.default_tab, "main");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load_from(&temp.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.json");
        let settings = Settings {
            invisible_tab_limit: 3,
            execution_timeout_secs: Some(30),
            ..Settings::default()
        };

        settings.save_to(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.execution_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"default_tab": "Story"}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.default_tab, "Story");
        assert_eq!(settings.invisible_tab_limit, 5);
    }

    #[test]
    fn test_malformed_file_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            Settings::load_from(&path),
            Err(SettingsError::Json(_))
        ));
    }
}
