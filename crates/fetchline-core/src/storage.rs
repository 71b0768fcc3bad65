//! Storage layer for settings (JSON file in the config directory)
//!
//! Only configuration lives here. Download progress is never persisted; a
//! resume relies on the partial destination file alone.

use crate::error::FetchError;
use fetchline_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const SETTINGS_FILE: &str = "settings.json";

/// Settings persistence rooted at a config directory
#[derive(Clone, Debug)]
pub struct SettingsStore {
    config_dir: PathBuf,
}

impl SettingsStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `<platform config dir>/fetchline`, or `.fetchline` if there is none
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("fetchline"))
            .unwrap_or_else(|| PathBuf::from(".fetchline"))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    /// Load settings; a missing file yields defaults
    pub async fn load(&self) -> Result<Settings, FetchError> {
        let path = self.path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {:?}, using defaults", path);
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Ignoring unreadable settings file {:?}: {}", path, e);
                Ok(Settings::default())
            }
        }
    }

    /// Save settings, creating the config directory if needed
    pub async fn save(&self, settings: &Settings) -> Result<(), FetchError> {
        fs::create_dir_all(&self.config_dir).await?;
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.path(), content).await?;
        Ok(())
    }

    /// Overwrite stored settings with defaults
    pub async fn reset(&self) -> Result<Settings, FetchError> {
        let settings = Settings::default();
        self.save(&settings).await?;
        Ok(settings)
    }
}
