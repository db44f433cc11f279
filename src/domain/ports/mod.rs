//! Port trait definitions (Hexagonal Architecture)
//!
//! Async interfaces for every external collaborator of the orchestration core:
//! - AgentRunner: coding-agent subprocess backends
//! - Planner / DesignValidator: design intake
//! - TaskEvaluator / Critic / ChallengeGenerator: the critique tiers

pub mod agent_runner;
pub mod critic;
pub mod planner;

pub use agent_runner::AgentRunner;
pub use critic::{ChallengeGenerator, Critic, TaskEvaluator};
pub use planner::{DesignValidator, Planner};
