//! Work record: the singleton describing the goal of a run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many workers a run may keep busy at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    /// One active worker unless the operator explicitly overrides it.
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "parallel" => Some(Self::Parallel),
            "sequential" | "serial" => Some(Self::Sequential),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall goal and completion authority for one project-local run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkState {
    /// Where the design came from (file list or `<inline>`)
    pub design_file: String,
    /// Goal text handed to the planner and replanner
    pub goal_text: String,
    /// SHA-256 of the design text the run was planned from
    #[serde(default)]
    pub spec_hash: String,
    /// Short description of the project given to every worker
    #[serde(default)]
    pub project_context: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Monotonic: never reverts once set
    #[serde(default)]
    pub is_complete: bool,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl WorkState {
    pub fn new(design_file: impl Into<String>, goal_text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            design_file: design_file.into(),
            goal_text: goal_text.into(),
            spec_hash: String::new(),
            project_context: String::new(),
            execution_mode: ExecutionMode::default(),
            is_complete: false,
            started_at: now,
            last_updated_at: now,
        }
    }

    pub fn with_spec_hash(mut self, spec_hash: impl Into<String>) -> Self {
        self.spec_hash = spec_hash.into();
        self
    }

    /// Flip the completion flag. Returns `true` only on the first call.
    pub fn mark_complete(&mut self) -> bool {
        if self.is_complete {
            return false;
        }
        self.is_complete = true;
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_updated_at {
            self.last_updated_at = now;
        }
    }
}
