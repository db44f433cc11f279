//! Planner and design validator results.

use super::task::TaskDraft;
use super::work::ExecutionMode;

/// Ordered task list extracted from a design, with the context every worker
/// receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub context: String,
    pub tasks: Vec<TaskDraft>,
    pub mode: Option<ExecutionMode>,
}

/// What to do with saved work after the design it was planned from changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignChange {
    /// Completed work still stands; continue under the new goal
    Keep,
    /// The change invalidates the plan; start over
    Replan,
}

/// Accept or reject decision on a design before planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub accepted: bool,
    /// Specific missing details when rejected
    pub gaps: Vec<String>,
    /// Clarified project summary when accepted
    pub project: String,
}

impl ValidationOutcome {
    pub fn accept(project: impl Into<String>) -> Self {
        Self {
            accepted: true,
            gaps: Vec::new(),
            project: project.into(),
        }
    }

    pub fn reject(gaps: Vec<String>) -> Self {
        Self {
            accepted: false,
            gaps,
            project: String::new(),
        }
    }

    /// Markdown body of the rejection artifact.
    pub fn rejection_markdown(&self) -> String {
        let mut out = String::from("# Design rejected\n\nThe design is missing:\n\n");
        for gap in &self.gaps {
            out.push_str("- ");
            out.push_str(gap);
            out.push('\n');
        }
        out
    }
}
