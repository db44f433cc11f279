//! Domain errors for the Flotilla orchestration core.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use super::models::task::TaskStatus;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[Uuid]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Domain-level errors that can occur in the orchestration core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Invalid state transition for task {task_id} from {from} to {to}")]
    InvalidStateTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<Uuid>),

    #[error("No work record exists for this run")]
    MissingWorkState,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// Errors raised by the durable state store.
///
/// Any of these is fatal for the mutation that raised it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Data directory {} is locked by another run", .0.display())]
    Locked(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of one agent invocation.
///
/// Variants that can carry diagnostic signal keep whatever partial output and
/// session id the agent produced before failing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    #[error("Agent timed out after {secs}s")]
    Timeout {
        secs: u64,
        partial: String,
        session_id: String,
    },

    #[error("Agent exited with code {code}: {message}")]
    Exit {
        code: i32,
        message: String,
        partial: String,
        session_id: String,
    },

    #[error("Agent reached max turns")]
    MaxTurns { partial: String, session_id: String },

    #[error("Agent returned empty output")]
    EmptyOutput { session_id: String },

    #[error("Agent invocation cancelled")]
    Cancelled,

    #[error("{runner} does not support {operation}")]
    Unsupported {
        runner: &'static str,
        operation: &'static str,
    },
}

impl AgentError {
    /// Output produced before the failure, if any.
    pub fn partial(&self) -> &str {
        match self {
            Self::Timeout { partial, .. }
            | Self::Exit { partial, .. }
            | Self::MaxTurns { partial, .. } => partial,
            Self::Spawn(_)
            | Self::EmptyOutput { .. }
            | Self::Cancelled
            | Self::Unsupported { .. } => "",
        }
    }

    /// Session that can be resumed for a summary, if any.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Timeout { session_id, .. }
            | Self::Exit { session_id, .. }
            | Self::MaxTurns { session_id, .. }
            | Self::EmptyOutput { session_id } => session_id,
            Self::Spawn(_) | Self::Cancelled | Self::Unsupported { .. } => "",
        }
    }
}

/// Failure of a narrow judgment or critique-stage call.
///
/// Every variant is inconclusive: it says nothing about whether the work is
/// done.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CritiqueError {
    #[error("Critique agent failed: {0}")]
    Agent(#[from] AgentError),

    #[error("Critique call timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed critique output: {0}")]
    Malformed(String),
}

/// Failure of the design validator or planner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Planner agent failed: {0}")]
    Agent(#[from] AgentError),

    #[error("Could not parse plan: {0}")]
    Malformed(String),

    #[error("Plan contained no tasks")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let a = Uuid::nil();
        let err = DomainError::DependencyCycle(vec![a, a]);
        assert!(err.to_string().contains(" -> "));
    }

    #[test]
    fn test_agent_error_diagnostics() {
        let err = AgentError::Timeout {
            secs: 10,
            partial: "wrote half the server".into(),
            session_id: "abc".into(),
        };
        assert_eq!(err.partial(), "wrote half the server");
        assert_eq!(err.session_id(), "abc");
        assert_eq!(AgentError::Cancelled.partial(), "");
        assert_eq!(
            AgentError::EmptyOutput {
                session_id: "s".into()
            }
            .session_id(),
            "s"
        );
    }

    #[test]
    fn test_store_error_wraps_domain_error() {
        let err: StoreError = DomainError::TaskNotFound(Uuid::nil()).into();
        assert!(matches!(err, StoreError::Domain(DomainError::TaskNotFound(_))));
    }
}
