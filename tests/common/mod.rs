//! Common test utilities for integration tests
//!
//! Scripted stand-ins for every external collaborator, plus a harness that
//! wires a store, queue, worker pool and judge together the way a run does.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use flotilla::domain::errors::{AgentError, CritiqueError, PlanError};
use flotilla::domain::models::{
    AgentOutput, AgentRequest, CancellationSource, CritiqueContext, CritiqueReport, DesignChange,
    Plan, Task, TaskDraft, ValidationOutcome, WorkState,
};
use flotilla::domain::ports::{AgentRunner, ChallengeGenerator, Critic, DesignValidator, Planner};
use flotilla::services::critique::{CritiqueBackends, CritiqueLimits, CritiquePipeline};
use flotilla::services::judge::{Judge, JudgeReport, JudgeSettings};
use flotilla::services::state_store::StateStore;
use flotilla::services::task_queue::TaskQueue;
use flotilla::services::worker_pool::{WorkerContext, WorkerPool, WorkerSettings};

pub const DONE: &str = "<summary>done</summary>\n<status>done</status>";

/// Agent runner that succeeds unless the prompt contains a failing marker.
pub struct FakeRunner {
    failing: Vec<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn succeeding() -> Arc<Self> {
        Self::failing_on(&[])
    }

    /// Fail every prompt that mentions one of `markers`.
    pub fn failing_on(markers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: markers.iter().map(ToString::to_string).collect(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// How many prompts mentioned `marker`.
    pub fn calls_mentioning(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }
}

#[async_trait]
impl AgentRunner for FakeRunner {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn execute(&self, request: AgentRequest) -> Result<AgentOutput, AgentError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.failing.iter().any(|m| request.prompt.contains(m.as_str())) {
            return Err(AgentError::Exit {
                code: 1,
                message: "tests failed".into(),
                partial: String::new(),
                session_id: String::new(),
            });
        }
        Ok(AgentOutput::new(DONE, ""))
    }

    async fn resume(&self, _: &str, _: &str, _: Duration) -> Result<String, AgentError> {
        Err(AgentError::Unsupported {
            runner: "fake",
            operation: "resume",
        })
    }
}

/// Agent runner with one scripted execute result and a queue of replies
/// for resumed sessions.
pub struct ScriptedRunner {
    execute: Result<AgentOutput, AgentError>,
    resumes: Mutex<VecDeque<Result<String, AgentError>>>,
    resumed_sessions: Mutex<Vec<Option<String>>>,
    resume_prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedRunner {
    pub fn new(
        execute: Result<AgentOutput, AgentError>,
        resumes: Vec<Result<String, AgentError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            execute,
            resumes: Mutex::new(resumes.into()),
            resumed_sessions: Mutex::new(Vec::new()),
            resume_prompts: Mutex::new(Vec::new()),
        })
    }

    /// The session each execute call asked to continue.
    pub fn resumed_sessions(&self) -> Vec<Option<String>> {
        self.resumed_sessions.lock().unwrap().clone()
    }

    /// `(session, prompt)` for every resume call, in order.
    pub fn resume_prompts(&self) -> Vec<(String, String)> {
        self.resume_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, request: AgentRequest) -> Result<AgentOutput, AgentError> {
        // the request owns the progress sender; keeping it would stall the worker
        self.resumed_sessions
            .lock()
            .unwrap()
            .push(request.resume_session.clone());
        self.execute.clone()
    }

    async fn resume(
        &self,
        session_id: &str,
        prompt: &str,
        _: Duration,
    ) -> Result<String, AgentError> {
        self.resume_prompts
            .lock()
            .unwrap()
            .push((session_id.to_string(), prompt.to_string()));
        self.resumes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Critic replaying a script, then silent forever. Records every call.
pub struct ScriptedCritic {
    script: Mutex<VecDeque<Result<CritiqueReport, CritiqueError>>>,
    calls: Mutex<usize>,
}

impl ScriptedCritic {
    pub fn silent() -> Arc<Self> {
        Self::new(vec![])
    }

    pub fn new(script: Vec<Result<CritiqueReport, CritiqueError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Critic for ScriptedCritic {
    async fn critique(&self, _: &CritiqueContext) -> Result<CritiqueReport, CritiqueError> {
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(CritiqueReport::empty()))
    }
}

/// Challenge generator replaying batches, then proposing nothing.
pub struct ScriptedChallenges {
    batches: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedChallenges {
    pub fn new(batches: Vec<Vec<&str>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(
                batches
                    .into_iter()
                    .map(|b| b.into_iter().map(ToString::to_string).collect())
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl ChallengeGenerator for ScriptedChallenges {
    async fn generate(
        &self,
        _: &CritiqueContext,
        _: usize,
    ) -> Result<Vec<String>, CritiqueError> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Planner returning a fixed plan.
pub struct FixedPlanner(pub Plan);

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(&self, _: &str) -> Result<Plan, PlanError> {
        Ok(self.0.clone())
    }
}

/// Planner that counts planning calls and answers design-change reviews
/// with a fixed decision.
pub struct ReviewingPlanner {
    plan: Plan,
    decision: DesignChange,
    plans: Mutex<usize>,
    reviews: Mutex<usize>,
}

impl ReviewingPlanner {
    pub fn new(plan: Plan, decision: DesignChange) -> Arc<Self> {
        Arc::new(Self {
            plan,
            decision,
            plans: Mutex::new(0),
            reviews: Mutex::new(0),
        })
    }

    pub fn plans(&self) -> usize {
        *self.plans.lock().unwrap()
    }

    pub fn reviews(&self) -> usize {
        *self.reviews.lock().unwrap()
    }
}

#[async_trait]
impl Planner for ReviewingPlanner {
    async fn plan(&self, _: &str) -> Result<Plan, PlanError> {
        *self.plans.lock().unwrap() += 1;
        Ok(self.plan.clone())
    }

    async fn review_change(&self, _: &[Task], _: &str) -> Result<DesignChange, PlanError> {
        *self.reviews.lock().unwrap() += 1;
        Ok(self.decision)
    }
}

/// Validator that counts calls and accepts everything.
#[derive(Default)]
pub struct CountingValidator {
    calls: Mutex<usize>,
}

impl CountingValidator {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl DesignValidator for CountingValidator {
    async fn validate(&self, _: &str) -> Result<ValidationOutcome, PlanError> {
        *self.calls.lock().unwrap() += 1;
        Ok(ValidationOutcome::accept(""))
    }
}

/// Validator returning a fixed outcome.
pub struct FixedValidator(pub ValidationOutcome);

#[async_trait]
impl DesignValidator for FixedValidator {
    async fn validate(&self, _: &str) -> Result<ValidationOutcome, PlanError> {
        Ok(self.0.clone())
    }
}

pub fn found(descriptions: &[&str]) -> Result<CritiqueReport, CritiqueError> {
    Ok(CritiqueReport::with_tasks(
        descriptions.iter().map(|d| TaskDraft::new(*d)).collect(),
    ))
}

/// Limits with short timeouts and the verifier off unless a test turns it on.
pub fn fast_limits() -> CritiqueLimits {
    CritiqueLimits {
        refiner_enabled: false,
        verifier_enabled: false,
        refine_timeout: Duration::from_secs(5),
        replan_timeout: Duration::from_secs(5),
        verifier_timeout: Duration::from_secs(5),
        ..CritiqueLimits::default()
    }
}

pub fn fast_worker_settings() -> WorkerSettings {
    WorkerSettings {
        task_timeout: Duration::from_secs(5),
        max_turns: 5,
        dependency_backoff: Duration::from_millis(10),
        project_context: String::new(),
        skills: String::new(),
    }
}

/// A store in a fresh temp dir, with a work record and `tasks` added.
pub async fn seeded_store(tasks: Vec<Task>) -> (TempDir, Arc<StateStore>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = StateStore::open(dir.path()).await.expect("open store");
    store
        .init_work(WorkState::new("SPEC.md", "build the thing"))
        .await
        .expect("init work");
    store.add_tasks(tasks).await.expect("add tasks");
    (dir, Arc::new(store))
}

/// Run workers and the judge over `store` until the judge finishes.
pub async fn drive(
    store: Arc<StateStore>,
    runner: Arc<dyn AgentRunner>,
    workers: usize,
    backends: CritiqueBackends,
    limits: CritiqueLimits,
    max_retries: u32,
) -> JudgeReport {
    let queue = Arc::new(TaskQueue::new());
    queue.extend(store.pending_ids().await).await;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let worker_cancel = CancellationSource::new();
    let judge_cancel = CancellationSource::new();

    let pool = WorkerPool::spawn(
        workers,
        WorkerContext {
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
            runner,
            events: events_tx,
            settings: fast_worker_settings(),
        },
        &worker_cancel.signal(),
    );

    let judge = Judge::new(
        Arc::clone(&store),
        queue,
        events_rx,
        CritiquePipeline::new(backends, limits).with_seed(42),
        JudgeSettings {
            poll_interval: Duration::from_millis(10),
            max_retries,
            evaluate_timeout: Duration::from_secs(5),
        },
    );

    let report = tokio::time::timeout(
        Duration::from_secs(30),
        judge.run(judge_cancel.signal()),
    )
    .await
    .expect("judge should finish")
    .expect("judge should not hit store errors");

    worker_cancel.cancel();
    pool.join().await;
    report
}
