//! Configuration for embedding deferql
//!
//! Loads from a YAML file; environment variables override file values:
//! - `DEFERQL_SESSION_TIMEZONE`, `DEFERQL_NAIVE_TIMESTAMPS`,
//!   `DEFERQL_LOSSY_COERCION` for the backend policy
//! - `RUST_LOG`, `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR` for logging

use crate::policy::{parse_offset, BackendPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: BackendPolicy,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, usually the process environment.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(tz) = lookup("DEFERQL_SESSION_TIMEZONE") {
            self.policy.session_timezone = tz;
        }
        if let Some(naive) = lookup("DEFERQL_NAIVE_TIMESTAMPS") {
            self.policy.naive_timestamps = naive
                .parse()
                .map_err(|e: deferql_ir::Error| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(lossy) = lookup("DEFERQL_LOSSY_COERCION") {
            self.policy.lossy_coercion = match lossy.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "DEFERQL_LOSSY_COERCION must be true or false, got '{other}'"
                    )))
                }
            };
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }

        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        parse_offset(&self.policy.session_timezone)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
