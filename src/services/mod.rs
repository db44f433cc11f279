pub mod critique;
pub mod dependency_resolver;
pub mod judge;
pub mod output_parser;
pub mod state_store;
pub mod task_queue;
pub mod worker_pool;

pub use critique::{CritiqueBackends, CritiqueLimits, CritiquePipeline, PassOutcome};
pub use dependency_resolver::DependencyResolver;
pub use judge::{Judge, JudgeExit, JudgePhase, JudgeReport, JudgeSettings};
pub use state_store::{RetryDecision, StateSnapshot, StateStore, StatusCounts, TaskReport};
pub use task_queue::TaskQueue;
pub use worker_pool::{
    effective_worker_count, TaskEvent, WorkerContext, WorkerPool, WorkerSettings,
};
