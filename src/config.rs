use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const APP_DIR: &str = "note-summary";
const CONFIG_ENV_VAR: &str = "NOTE_SUMMARY_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub azure: AzureConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub onenote: OneNoteConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_subject_pattern")]
    pub subject_pattern: String,

    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,

    #[serde(default = "default_mark_as_read")]
    pub mark_as_read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneNoteConfig {
    #[serde(default = "default_notebook_name")]
    pub notebook_name: String,

    #[serde(default = "default_section_name")]
    pub section_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
    pub token_cache_path: Option<PathBuf>,
}

fn default_subject_pattern() -> String {
    "[Note]".to_string()
}

fn default_lookback_hours() -> u32 {
    24
}

fn default_mark_as_read() -> bool {
    true
}

fn default_notebook_name() -> String {
    "Email Notes".to_string()
}

fn default_section_name() -> String {
    "Captured Notes".to_string()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            subject_pattern: default_subject_pattern(),
            lookback_hours: default_lookback_hours(),
            mark_as_read: default_mark_as_read(),
        }
    }
}

impl Default for OneNoteConfig {
    fn default() -> Self {
        Self {
            notebook_name: default_notebook_name(),
            section_name: default_section_name(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir().join("processed.db"))
    }

    pub fn token_cache_path(&self) -> PathBuf {
        self.token_cache_path
            .clone()
            .unwrap_or_else(|| data_dir().join("token_cache.json"))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load from an explicit path, or from the first candidate found by
    /// [`Config::find_config_file`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::find_config_file()?,
        };

        if !config_path.exists() {
            return Err(AppError::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        tracing::debug!("Loading configuration from {}", config_path.display());
        let content = std::fs::read_to_string(&config_path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(AppError::Config("Configuration is empty".to_string()));
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.azure.client_id.trim().is_empty() {
            return Err(AppError::Config("azure.client_id is required".to_string()));
        }
        if self.azure.tenant_id.trim().is_empty() {
            return Err(AppError::Config("azure.tenant_id is required".to_string()));
        }
        Ok(())
    }

    pub fn find_config_file() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(path);
            }
            tracing::debug!(
                "{} points to missing file {}, continuing search",
                CONFIG_ENV_VAR,
                path.display()
            );
        }

        Self::candidate_paths()
            .into_iter()
            .find(|candidate| candidate.exists())
            .ok_or_else(|| {
                AppError::Config(
                    "No config file found. Create config/config.toml from config.example.toml"
                        .to_string(),
                )
            })
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("config").join("config.toml"),
            PathBuf::from("config.toml"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(APP_DIR).join("config.toml"));
        }
        candidates
    }
}
