//! Planning and critique collaborators backed by an [`AgentRunner`].
//!
//! Each adapter renders a prompt, runs it through the injected runner, and
//! parses the tagged reply with the shared output parser. Agent failures and
//! unparseable replies surface as errors; the critique pipeline reads every
//! such error as inconclusive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::domain::errors::{AgentError, CritiqueError, PlanError};
use crate::domain::models::{
    AgentRequest, CancelSignal, CritiqueContext, CritiqueReport, DesignChange, Plan, Task,
    ValidationOutcome, Verdict,
};
use crate::domain::ports::{
    AgentRunner, ChallengeGenerator, Critic, DesignValidator, Planner, TaskEvaluator,
};
use crate::services::output_parser::{
    parse_challenges, parse_design_change, parse_percent, parse_plan, parse_task_block,
    parse_validation, parse_verdict,
};

use super::prompts;

/// Runner plus the limits applied to every call made through it.
#[derive(Clone)]
pub struct LlmBackend {
    runner: Arc<dyn AgentRunner>,
    timeout: Duration,
    max_turns: Option<u32>,
    cancel: Option<CancelSignal>,
}

impl LlmBackend {
    pub fn new(runner: Arc<dyn AgentRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            max_turns: None,
            cancel: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    async fn ask(&self, prompt: String) -> Result<String, AgentError> {
        let mut request = AgentRequest::new(prompt, self.timeout);
        if let Some(turns) = self.max_turns {
            request = request.with_max_turns(turns);
        }
        if let Some(cancel) = &self.cancel {
            request = request.with_cancel(cancel.clone());
        }
        let output = self.runner.execute(request).await?;
        debug!(runner = self.runner.name(), chars = output.text.len(), "llm reply");
        Ok(output.text)
    }
}

/// Extracts a project context and task drafts from the design.
pub struct LlmPlanner {
    backend: LlmBackend,
}

impl LlmPlanner {
    pub fn new(backend: LlmBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    #[instrument(skip_all)]
    async fn plan(&self, goal: &str) -> Result<Plan, PlanError> {
        let reply = self.backend.ask(prompts::planner(goal)).await?;
        parse_plan(&reply)
    }

    #[instrument(skip_all, fields(tasks = tasks.len()))]
    async fn review_change(
        &self,
        tasks: &[Task],
        new_goal: &str,
    ) -> Result<DesignChange, PlanError> {
        let reply = self
            .backend
            .ask(prompts::design_change(tasks, new_goal))
            .await?;
        Ok(parse_design_change(&reply))
    }
}

pub struct LlmValidator {
    backend: LlmBackend,
}

impl LlmValidator {
    pub fn new(backend: LlmBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl DesignValidator for LlmValidator {
    #[instrument(skip_all)]
    async fn validate(&self, design: &str) -> Result<ValidationOutcome, PlanError> {
        let reply = self.backend.ask(prompts::validator(design)).await?;
        parse_validation(&reply)
    }
}

/// Narrow per-task judgment.
pub struct LlmEvaluator {
    backend: LlmBackend,
}

impl LlmEvaluator {
    pub fn new(backend: LlmBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskEvaluator for LlmEvaluator {
    async fn evaluate(&self, task: &Task) -> Result<Verdict, CritiqueError> {
        let reply = self.backend.ask(prompts::judge_task(task)).await?;
        parse_verdict(&reply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticMode {
    /// Batch gap finding over recent history
    Refine,
    /// Whole-goal reassessment
    Replan,
}

/// Refiner or replanner, depending on [`CriticMode`].
pub struct LlmCritic {
    backend: LlmBackend,
    mode: CriticMode,
}

impl LlmCritic {
    pub fn refiner(backend: LlmBackend) -> Self {
        Self {
            backend,
            mode: CriticMode::Refine,
        }
    }

    pub fn replanner(backend: LlmBackend) -> Self {
        Self {
            backend,
            mode: CriticMode::Replan,
        }
    }

    pub fn mode(&self) -> CriticMode {
        self.mode
    }
}

#[async_trait]
impl Critic for LlmCritic {
    #[instrument(skip_all, fields(mode = ?self.mode))]
    async fn critique(&self, context: &CritiqueContext) -> Result<CritiqueReport, CritiqueError> {
        let prompt = match self.mode {
            CriticMode::Refine => prompts::refiner(context),
            CriticMode::Replan => prompts::replanner(context),
        };
        let reply = self.backend.ask(prompt).await?;
        let tasks = parse_task_block(&reply)
            .ok_or_else(|| CritiqueError::Malformed("no <tasks> block in reply".into()))?;
        Ok(CritiqueReport {
            tasks,
            satisfied_percent: match self.mode {
                CriticMode::Replan => parse_percent(&reply),
                CriticMode::Refine => None,
            },
        })
    }
}

/// Adversarial challenge generation.
pub struct LlmChallengeGenerator {
    backend: LlmBackend,
}

impl LlmChallengeGenerator {
    pub fn new(backend: LlmBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ChallengeGenerator for LlmChallengeGenerator {
    #[instrument(skip_all, fields(count = count))]
    async fn generate(
        &self,
        context: &CritiqueContext,
        count: usize,
    ) -> Result<Vec<String>, CritiqueError> {
        let reply = self.backend.ask(prompts::verifier(context, count)).await?;
        let mut challenges = parse_challenges(&reply)?;
        challenges.truncate(count);
        Ok(challenges)
    }
}
