use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::models::LoggingConfig;

/// Resolved logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,

    /// Console format
    pub format: LogFormat,

    /// Directory for rolling json log files; `None` disables file output
    pub log_dir: Option<PathBuf>,

    /// Mirror logs to stderr
    pub enable_console: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

impl LogConfig {
    /// Settings for a run whose state lives in `data_dir`.
    pub fn from_settings(settings: &LoggingConfig, data_dir: &Path) -> Self {
        Self {
            level: settings.level.clone(),
            format: LogFormat::from_str(&settings.format).unwrap_or(LogFormat::Pretty),
            log_dir: settings.file_output.then(|| data_dir.join("log")),
            enable_console: settings.console,
        }
    }

    /// Console-only settings, used by commands that never touch the data directory.
    pub fn console_only(level: &str) -> Self {
        Self {
            level: level.to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            enable_console: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from_settings(&LoggingConfig::default(), Path::new(".flotilla"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_places_logs_under_data_dir() {
        let config = LogConfig::from_settings(&LoggingConfig::default(), Path::new("/tmp/run"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/run/log")));
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.enable_console);
    }

    #[test]
    fn test_file_output_disabled() {
        let settings = LoggingConfig {
            file_output: false,
            console: true,
            format: "json".into(),
            ..LoggingConfig::default()
        };
        let config = LogConfig::from_settings(&settings, Path::new(".flotilla"));
        assert!(config.log_dir.is_none());
        assert_eq!(config.format, LogFormat::Json);
    }
}
