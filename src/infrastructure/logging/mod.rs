//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - Rolling json log files under the data directory
//! - Optional stderr console output (pretty or json)
//! - `RUST_LOG` override of the configured level

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat};
pub use logger::LoggerImpl;
