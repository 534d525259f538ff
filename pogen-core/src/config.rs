//! Application configuration (`pogen.toml`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::sheet::TableLayout;
use crate::text::DEFAULT_ADDRESS_WIDTH;

/// Configuration file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "pogen.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub layout: TemplateLayout,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `pogen.toml` when present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            debug!(path = %default_path.display(), "Using configuration file");
            Self::from_file(default_path)
        } else {
            debug!("No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.layout.table.validate()?;
        if self.layout.address_width == 0 {
            anyhow::bail!("Configuration error: layout.address_width must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.extraction.temperature) {
            anyhow::bail!(
                "Configuration error: extraction.temperature {} is outside 0.0..=2.0",
                self.extraction.temperature
            );
        }
        if !(0.0..=1.0).contains(&self.extraction.top_p) {
            anyhow::bail!(
                "Configuration error: extraction.top_p {} is outside 0.0..=1.0",
                self.extraction.top_p
            );
        }
        Ok(())
    }
}

/// File system locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Purchase-order template workbook
    pub template: PathBuf,
    /// Where transient workbooks are written before being saved or discarded
    pub temp_dir: PathBuf,
    /// Reference log of extraction results
    pub archive_dir: PathBuf,
    /// Remembered form fields
    pub settings_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("data/templates/po_template.xlsx"),
            temp_dir: PathBuf::from("temp"),
            archive_dir: PathBuf::from("jsons"),
            settings_file: PathBuf::from("config/user_settings.toml"),
        }
    }
}

/// Template geometry: the item table plus the address column width
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateLayout {
    #[serde(flatten)]
    pub table: TableLayout,
    /// Maximum characters on the first address line
    pub address_width: usize,
}

impl Default for TemplateLayout {
    fn default() -> Self {
        Self {
            table: TableLayout::default(),
            address_width: DEFAULT_ADDRESS_WIDTH,
        }
    }
}

/// Extraction service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.2,
            top_p: 0.9,
            api_key_env: "GOOGLE_API_KEY".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 120,
        }
    }
}
