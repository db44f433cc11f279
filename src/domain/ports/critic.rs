//! Critique ports, from the per-task evaluator up to the adversarial verifier.
//!
//! Every error returned through these traits is inconclusive. Callers must
//! never read an `Err` as "nothing found".

use async_trait::async_trait;

use crate::domain::errors::CritiqueError;
use crate::domain::models::{CritiqueContext, CritiqueReport, Task, Verdict};

/// Narrow judgment: did this one completed task do what it claims?
#[async_trait]
pub trait TaskEvaluator: Send + Sync {
    async fn evaluate(&self, task: &Task) -> Result<Verdict, CritiqueError>;
}

/// Refiner or replanner backend.
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(&self, context: &CritiqueContext) -> Result<CritiqueReport, CritiqueError>;
}

/// Adversarial verifier backend: proposes challenges against a claimed-complete
/// result.
#[async_trait]
pub trait ChallengeGenerator: Send + Sync {
    /// Propose up to `count` challenges. Text in
    /// `context.issued_challenges` should not be proposed again.
    async fn generate(
        &self,
        context: &CritiqueContext,
        count: usize,
    ) -> Result<Vec<String>, CritiqueError>;
}
