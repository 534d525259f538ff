//! Remembered form fields
//!
//! Settings are read once at start-up and written only at explicit commit
//! points. A missing or unreadable file never stops the application; it just
//! means starting from the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;

pub const DEFAULT_PHONE_CODE: &str = "+60";

/// Form fields the user can ask to have remembered between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub po_number: String,
    pub project_name: String,
    pub purchaser_name: String,
    pub phone_code: String,
    pub phone_number: String,
    pub manager_name: String,
    pub remember: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            po_number: String::new(),
            project_name: String::new(),
            purchaser_name: String::new(),
            phone_code: DEFAULT_PHONE_CODE.to_string(),
            phone_number: String::new(),
            manager_name: String::new(),
            remember: false,
        }
    }
}

/// TOML file holding [`UserSettings`]
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    path: PathBuf,
}

impl SettingsRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings, or defaults when the file is absent or corrupt
    pub fn load(&self) -> UserSettings {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved settings, using defaults");
                return UserSettings::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read settings, using defaults");
                return UserSettings::default();
            }
        };

        match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt settings file, using defaults");
                UserSettings::default()
            }
        }
    }

    pub fn save(&self, settings: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(settings)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), remember = settings.remember, "Saved settings");
        Ok(())
    }

    /// Overwrite the stored settings with defaults
    pub fn clear(&self) -> Result<()> {
        self.save(&UserSettings::default())
    }
}
