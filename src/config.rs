//! Configuration
//!
//! Layered configuration: defaults, then an optional TOML file, then
//! `DOCMILL_*` environment variables. Sections cover the generation service
//! endpoint, the mapping store location, and logging.

use crate::error::EngineError;
use crate::logging::LoggingConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Generation service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the generation service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent with every request.
    #[serde(default)]
    pub api_key: String,
}

fn default_base_url() -> String {
    "https://api.docmill.dev/v1".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
        }
    }
}

/// Mapping store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the sled database.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "docmill")
        .map(|dirs| dirs.data_dir().join("mappings"))
        .unwrap_or_else(|| PathBuf::from(".docmill/mappings"))
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocmillConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DocmillConfig {
    /// Load configuration, merging an optional file with environment overrides.
    ///
    /// When `path` is given the file must exist. Otherwise the default config
    /// path is merged only if present. Environment variables use the
    /// `DOCMILL_` prefix with `__` as the section separator, e.g.
    /// `DOCMILL_API__BASE_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("DOCMILL").separator("__"));

        let config: DocmillConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the loaded values are usable.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.api.base_url.trim().is_empty() {
            return Err(EngineError::ConfigError(
                "api.base_url must not be empty".to_string(),
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(EngineError::ConfigError(
                "store.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default config file location, platform dependent.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "docmill")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
