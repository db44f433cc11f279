//! Flotilla - coding-agent fleet orchestrator
//!
//! Flotilla turns a design document into a task list, runs a fleet of coding
//! agents against it in parallel, and keeps going until a tiered critique
//! pipeline agrees the goal is met.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Task and work models, errors, port traits
//! - **Service Layer** (`services`): State store, queue, workers, judge, critique
//! - **Adapter Layer** (`adapters`): Agent CLI runners and prompt-driven collaborators
//! - **Application Layer** (`application`): Run lifecycle and design intake
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use flotilla::application::{Collaborators, RunManager, RunOptions};
//! use flotilla::domain::models::{CancellationSource, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let interrupt = CancellationSource::new();
//!     let collaborators = Collaborators::from_config(&config, &interrupt.signal());
//!     let outcome = RunManager::new(config, ".", collaborators)
//!         .run(RunOptions::default(), interrupt.signal())
//!         .await?;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Collaborators, RunManager, RunOptions, RunOutcome};
pub use domain::models::{
    CancelSignal, CancellationSource, Config, ExecutionMode, Task, TaskStatus, WorkState,
};
pub use domain::ports::{
    AgentRunner, ChallengeGenerator, Critic, DesignValidator, Planner, TaskEvaluator,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Judge, StateStore, TaskQueue, WorkerPool};
