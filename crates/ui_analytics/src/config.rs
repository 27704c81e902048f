//! Configuration management for the analytics engine.
//!
//! Loads logging settings and per-integration options from a TOML file:
//!
//! ```toml
//! [logging]
//! level = "info"
//! json_format = false
//!
//! [integrations.google-analytics]
//! tracking_id = "UA-000000-1"
//! anonymize_ip = true
//! ```

use crate::error::{AnalyticsError, Result};
use crate::event::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Accepted values for `logging.level`
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_log_level() -> String {
    "info".to_string()
}

/// Engine configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Options accumulated on each named integration before it is defined
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub integrations: BTreeMap<String, Properties>,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AnalyticsConfig {
    /// Loads configuration from a TOML file, creating a default one if it doesn't exist.
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            Self::from_toml_str(&content)
        } else {
            let default_config = AnalyticsConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validates the configuration for common errors.
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(AnalyticsError::Config(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            )));
        }

        if let Some(blank) = self.integrations.keys().find(|name| name.trim().is_empty()) {
            return Err(AnalyticsError::Config(format!(
                "Integration names cannot be blank, found {blank:?}"
            )));
        }

        Ok(())
    }
}
