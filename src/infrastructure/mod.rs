//! Infrastructure layer module
//!
//! Process-wide concerns that sit outside the orchestration core:
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod logging;
