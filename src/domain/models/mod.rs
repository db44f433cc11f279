//! Domain models.

pub mod agent;
pub mod cancellation;
pub mod config;
pub mod critique;
pub mod plan;
pub mod task;
pub mod work;

pub use agent::{AgentOutput, AgentRequest, ProgressSender};
pub use cancellation::{CancelSignal, CancellationSource};
pub use config::{AdversarialConfig, AgentConfig, Config, CritiqueConfig, LoggingConfig};
pub use critique::{CritiqueContext, CritiqueReport, CritiqueStage, TaskVerdict, Verdict};
pub use plan::{DesignChange, Plan, ValidationOutcome};
pub use task::{materialize_drafts, truncate_chars, Task, TaskDraft, TaskStatus, WorkerAssignment};
pub use work::{ExecutionMode, WorkState};
