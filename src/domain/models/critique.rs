//! Inputs and outputs of the narrow judgment and the critique stages.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Task, TaskDraft};

/// Escalating critique stages, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueStage {
    Refiner,
    Replanner,
    Verifier,
}

impl CritiqueStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refiner => "refiner",
            Self::Replanner => "replanner",
            Self::Verifier => "verifier",
        }
    }
}

impl fmt::Display for CritiqueStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of asking whether one completed task did what it claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "note", rename_all = "snake_case")]
pub enum Verdict {
    Satisfied,
    Unsatisfied(String),
    /// The evaluator call failed or timed out
    Inconclusive(String),
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Satisfied => "satisfied",
            Self::Unsatisfied(_) => "unsatisfied",
            Self::Inconclusive(_) => "inconclusive",
        }
    }
}

/// A verdict recorded against a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskVerdict {
    pub task_id: Uuid,
    pub description: String,
    pub verdict: Verdict,
}

/// Snapshot of the run handed to the refiner, replanner and verifier.
#[derive(Debug, Clone, Default)]
pub struct CritiqueContext {
    pub goal_text: String,
    pub project_context: String,
    pub completed: Vec<Task>,
    pub failed: Vec<Task>,
    pub verdicts: Vec<TaskVerdict>,
    /// Challenge text already issued in earlier verifier rounds
    pub issued_challenges: Vec<String>,
}

/// What a refiner or replanner call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CritiqueReport {
    pub tasks: Vec<TaskDraft>,
    /// Replanner's estimate of how much of the goal is met
    pub satisfied_percent: Option<u8>,
}

impl CritiqueReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<TaskDraft>) -> Self {
        Self {
            tasks,
            satisfied_percent: None,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.tasks.is_empty()
    }
}
