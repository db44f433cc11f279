use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid workers: {0}. Must be between 1 and 64")]
    InvalidWorkers(usize),

    #[error("Invalid task_timeout_secs: {0}. Must be positive")]
    InvalidTaskTimeout(u64),

    #[error("Invalid max_turns: {0}. Must be positive")]
    InvalidMaxTurns(u32),

    #[error("Invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Data directory cannot be empty")]
    EmptyDataDir,

    #[error("Invalid adversarial sample: {sample} exceeds candidates ({candidates})")]
    InvalidSample { sample: usize, candidates: usize },
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .flotilla/config.yaml
    /// 3. .flotilla/local.yaml (optional local overrides)
    /// 4. Environment variables (FLOTILLA_* prefix, `__` separates nested keys)
    ///
    /// Command-line flags are applied on top by the command that needs them.
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`ConfigLoader::load`], rooted at `project_root`.
    pub fn load_from(project_root: &Path) -> Result<Config> {
        let dir = project_root.join(".flotilla");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("FLOTILLA_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.workers == 0 || config.workers > 64 {
            return Err(ConfigError::InvalidWorkers(config.workers));
        }

        if config.task_timeout_secs == 0 {
            return Err(ConfigError::InvalidTaskTimeout(config.task_timeout_secs));
        }

        if config.max_turns == 0 {
            return Err(ConfigError::InvalidMaxTurns(config.max_turns));
        }

        if config.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.poll_interval_ms));
        }

        if config.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.max_retries));
        }

        if config.data_dir.trim().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.adversarial.sample > config.adversarial.candidates {
            return Err(ConfigError::InvalidSample {
                sample: config.adversarial.sample,
                candidates: config.adversarial.candidates,
            });
        }

        Ok(())
    }
}
