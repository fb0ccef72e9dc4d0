//! Persisted user settings
//!
//! Stores the validated install directory in
//! `<config_dir>/patch-updater/settings.json` so later runs do not prompt.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::InstallDir;

/// User settings for patch-updater
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    /// Last validated install directory (a `.minecraft` folder)
    #[serde(default)]
    pub install_dir: String,
}

impl Settings {
    /// Get the config directory path (~/.config/patch-updater)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("patch-updater");

        Ok(config_dir)
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|path| Self::load_from(&path)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load settings from an explicit file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// The stored install directory, if it still validates
    pub fn valid_install_dir(&self) -> Option<InstallDir> {
        if self.install_dir.trim().is_empty() {
            return None;
        }
        match InstallDir::new(&self.install_dir) {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!("Stored install directory is no longer valid: {}", e);
                None
            }
        }
    }

    pub fn set_install_dir(&mut self, dir: &InstallDir) {
        self.install_dir = dir.path().to_string_lossy().to_string();
    }
}
