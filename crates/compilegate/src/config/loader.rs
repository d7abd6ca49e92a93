//! Configuration file loading for compilegate
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load an optional config file, then apply `COMPILEGATE_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.compiler_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("compiler_path is empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_source_length == 0 {
            return Err(ConfigError::Invalid(
                "max_source_length must be at least 1".to_string(),
            ));
        }

        for (key, seconds) in [
            ("compilation_timeout", self.compilation_timeout),
            ("queue_wait_timeout", self.queue_wait_timeout),
            ("queue_poll_interval", self.queue_poll_interval),
        ] {
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be a positive number of seconds, got {seconds}"
                )));
            }
            Duration::try_from_secs_f64(seconds)
                .map_err(|e| ConfigError::Invalid(format!("{key} is out of range: {e}")))?;
        }

        if let Some(ref patterns) = self.deny_patterns {
            for pattern in patterns {
                regex_lite::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
            }
        }

        Ok(())
    }
}
