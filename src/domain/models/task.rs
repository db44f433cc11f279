//! Task domain model.
//!
//! Tasks are discrete units of work that agents execute.
//! They form a DAG through their dependency sets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be picked up by a worker
    #[default]
    Pending,
    /// Currently held by a worker
    Running,
    /// Finished successfully; immutable from here on
    Completed,
    /// Last attempt failed; the judge decides between retry and exhaustion
    Failed,
    /// Retries exhausted, or a (transitive) dependency was exhausted
    CascadeFailed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::CascadeFailed => "cascade_failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cascade_failed" | "cascade-failed" => Some(Self::CascadeFailed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::CascadeFailed)
    }

    /// Pending or running: the run cannot be settled while any task is here.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Valid transitions from this status.
    ///
    /// `Running -> Pending` exists only for interrupted-run recovery.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::CascadeFailed],
            Self::Running => &[Self::Completed, Self::Failed, Self::Pending],
            Self::Failed => &[Self::Pending, Self::CascadeFailed],
            Self::Completed | Self::CascadeFailed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which worker may execute a task.
///
/// Persisted as a plain string: `"auto"` or the pinned worker id (`"w0"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerAssignment {
    #[default]
    Auto,
    Pinned(String),
}

impl WorkerAssignment {
    /// Whether `worker_id` may take this task.
    pub fn admits(&self, worker_id: &str) -> bool {
        match self {
            Self::Auto => true,
            Self::Pinned(id) => id == worker_id,
        }
    }

    pub fn pinned(&self) -> Option<&str> {
        match self {
            Self::Auto => None,
            Self::Pinned(id) => Some(id),
        }
    }
}

impl From<String> for WorkerAssignment {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            Self::Auto
        } else {
            Self::Pinned(trimmed.to_string())
        }
    }
}

impl From<WorkerAssignment> for String {
    fn from(value: WorkerAssignment) -> Self {
        match value {
            WorkerAssignment::Auto => "auto".to_string(),
            WorkerAssignment::Pinned(id) => id,
        }
    }
}

impl fmt::Display for WorkerAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Pinned(id) => f.write_str(id),
        }
    }
}

/// A task description produced by the planner or a critique stage, before it
/// has an identity.
///
/// `depends_on` holds 1-based positions inside the same batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default)]
    pub worker: WorkerAssignment,
}

impl TaskDraft {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn depends_on(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.depends_on.extend(positions);
        self
    }

    pub fn pinned_to(mut self, worker: impl Into<String>) -> Self {
        self.worker = WorkerAssignment::from(worker.into());
        self
    }
}

/// Materialize a batch of drafts into tasks.
///
/// Position references are resolved against earlier drafts of the same batch
/// only; forward, self and out-of-range references are dropped so a batch can
/// never introduce a cycle.
pub fn materialize_drafts(drafts: &[TaskDraft]) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::with_capacity(drafts.len());
    for (index, draft) in drafts.iter().enumerate() {
        let mut task = Task::new(draft.description.trim()).with_worker(draft.worker.clone());
        for &position in &draft.depends_on {
            if position >= 1 && position <= index {
                task = task.with_dependency(tasks[position - 1].id);
            }
        }
        tasks.push(task);
    }
    tasks
}

/// A discrete unit of work that can be executed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Natural-language instruction
    pub description: String,
    /// Current status
    pub status: TaskStatus,
    /// Worker assignment
    #[serde(default)]
    pub worker: WorkerAssignment,
    /// Task IDs this depends on, in declaration order
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Failures observed so far
    #[serde(default)]
    pub retries: u32,
    /// Last known error text
    #[serde(default)]
    pub error: String,
    /// Raw agent output or best-effort diagnostic
    #[serde(default)]
    pub result: String,
    /// Short outcome summary
    #[serde(default)]
    pub summary: String,
    /// Agent session to resume from
    #[serde(default)]
    pub session_id: String,
    /// Follow-up work suggested by the agent
    #[serde(default)]
    pub followups: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            status: TaskStatus::default(),
            worker: WorkerAssignment::default(),
            dependencies: Vec::new(),
            retries: 0,
            error: String::new(),
            result: String::new(),
            summary: String::new(),
            session_id: String::new(),
            followups: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.dependencies.contains(&task_id) && task_id != self.id {
            self.dependencies.push(task_id);
        }
        self
    }

    /// Set worker assignment.
    pub fn with_worker(mut self, worker: WorkerAssignment) -> Self {
        self.worker = worker;
        self
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status, rejecting edges outside the table.
    ///
    /// `started_at` and `completed_at` are each written at most once.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> DomainResult<()> {
        if !self.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                task_id: self.id,
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;
        let now = Utc::now();
        match new_status {
            TaskStatus::Running => {
                self.started_at.get_or_insert(now);
            }
            TaskStatus::Completed | TaskStatus::CascadeFailed => {
                self.completed_at.get_or_insert(now);
            }
            TaskStatus::Pending | TaskStatus::Failed => {}
        }
        Ok(())
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Short prefix of the id for log lines.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Validate task.
    pub fn validate(&self) -> DomainResult<()> {
        if self.description.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "Task description cannot be empty".to_string(),
            ));
        }
        if self.dependencies.contains(&self.id) {
            return Err(DomainError::ValidationFailed(
                "Task cannot depend on itself".to_string(),
            ));
        }
        Ok(())
    }
}

/// Truncate text on a char boundary for prompts and log lines.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("Implement the login feature");
        assert_eq!(task.description, "Implement the login feature");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.worker, WorkerAssignment::Auto);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_task_state_transitions() {
        let mut task = Task::new("Test task description");

        task.transition_to(TaskStatus::Running).unwrap();
        let started = task.started_at.expect("started_at set");

        task.transition_to(TaskStatus::Failed).unwrap();
        task.transition_to(TaskStatus::Pending).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        assert_eq!(task.started_at, Some(started), "started_at is set once");

        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.is_terminal());
    }

    #[test]
    fn test_completed_is_immutable() {
        let mut task = Task::new("done");
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Completed).unwrap();

        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Failed,
            TaskStatus::CascadeFailed,
        ] {
            let err = task.transition_to(status).unwrap_err();
            assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        }
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_illegal_edges_rejected() {
        let mut task = Task::new("pending");
        assert!(task.transition_to(TaskStatus::Completed).is_err());
        assert!(task.transition_to(TaskStatus::Failed).is_err());
        assert!(task.transition_to(TaskStatus::CascadeFailed).is_ok());
        assert!(task.transition_to(TaskStatus::Pending).is_err());
    }

    #[test]
    fn test_task_dependencies() {
        let dep_id = Uuid::new_v4();
        let task = Task::new("Test task description")
            .with_dependency(dep_id)
            .with_dependency(dep_id);

        assert_eq!(task.dependencies, vec![dep_id]);
    }

    #[test]
    fn test_worker_assignment_serde() {
        let json = serde_json::to_string(&WorkerAssignment::Pinned("w1".into())).unwrap();
        assert_eq!(json, "\"w1\"");
        let parsed: WorkerAssignment = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(parsed, WorkerAssignment::Auto);
        assert!(WorkerAssignment::Pinned("w0".into()).admits("w0"));
        assert!(!WorkerAssignment::Pinned("w0".into()).admits("w1"));
    }

    #[test]
    fn test_materialize_drafts_resolves_backward_references() {
        let drafts = vec![
            TaskDraft::new("Create go.mod"),
            TaskDraft::new("Implement server").depends_on([1]),
            TaskDraft::new("Write tests").depends_on([1, 2, 3, 9]),
        ];
        let tasks = materialize_drafts(&drafts);

        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[1].dependencies, vec![tasks[0].id]);
        // self (3) and out-of-range (9) references are dropped
        assert_eq!(tasks[2].dependencies, vec![tasks[0].id, tasks[1].id]);
    }

    #[test]
    fn test_task_validation() {
        assert!(Task::new("   ").validate().is_err());
        assert!(Task::new("Valid prompt").validate().is_ok());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
    }
}
