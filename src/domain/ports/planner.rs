//! Planning ports: design validation and task extraction.

use async_trait::async_trait;

use crate::domain::errors::PlanError;
use crate::domain::models::{DesignChange, Plan, Task, ValidationOutcome};

/// Turns a design document into an ordered task list. Called once per fresh run.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str) -> Result<Plan, PlanError>;

    /// Judge whether `tasks`, planned from an earlier design, survive the
    /// edit that produced `new_goal`. Planners that cannot tell replan.
    async fn review_change(
        &self,
        tasks: &[Task],
        new_goal: &str,
    ) -> Result<DesignChange, PlanError> {
        let _ = (tasks, new_goal);
        Ok(DesignChange::Replan)
    }
}

/// Decides whether a design is concrete enough to plan from.
#[async_trait]
pub trait DesignValidator: Send + Sync {
    async fn validate(&self, design: &str) -> Result<ValidationOutcome, PlanError>;
}
