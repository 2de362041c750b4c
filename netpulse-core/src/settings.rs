//! Settings persistence module
//!
//! Saves and loads engine settings to/from disk

use crate::network_analyzer::{ConfigError, Endpoints, RunConfig};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SETTINGS_FILE: &str = "settings.json";
const APP_NAME: &str = "NetPulse";

/// Errors from reading or writing the settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not determine settings directory")]
    NoConfigDir,

    #[error("Settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Persisted engine settings. Missing fields fall back to their defaults so
/// older files keep loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Run parameters
    #[serde(default)]
    pub run: RunConfig,
    /// Server pool and probe URLs
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run.validate()?;
        self.endpoints.validate()
    }
}

/// Get the settings directory path
/// Linux: ~/.config/NetPulse/, Windows: %APPDATA%\NetPulse\
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

/// Get the full path to the settings file
pub fn settings_path() -> Option<PathBuf> {
    get_settings_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Load settings from the default location, falling back to defaults on any
/// problem.
pub fn load_settings() -> EngineSettings {
    let path = match settings_path() {
        Some(p) => p,
        None => {
            debug!("Could not determine settings path, using defaults");
            return EngineSettings::default();
        }
    };

    if !path.exists() {
        debug!("Settings file does not exist, using defaults");
        return EngineSettings::default();
    }

    match load_settings_from(&path) {
        Ok(settings) => {
            info!("Loaded settings from {:?}", path);
            settings
        }
        Err(e) => {
            error!("Failed to load settings file: {}", e);
            EngineSettings::default()
        }
    }
}

/// Load settings from an explicit path
pub fn load_settings_from(path: &Path) -> Result<EngineSettings, SettingsError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Save settings to the default location
pub fn save_settings(settings: &EngineSettings) -> Result<PathBuf, SettingsError> {
    let path = settings_path().ok_or(SettingsError::NoConfigDir)?;
    save_settings_to(settings, &path)?;
    Ok(path)
}

/// Save settings to an explicit path, creating parent directories
pub fn save_settings_to(settings: &EngineSettings, path: &Path) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    info!("Saved settings to {:?}", path);
    Ok(())
}
