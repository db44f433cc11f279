//! Domain layer for the Flotilla orchestration core
//!
//! This module contains the task and work models and the ports through which
//! the core talks to its external collaborators.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    AgentError, CritiqueError, DomainError, DomainResult, PlanError, StoreError, StoreResult,
};
