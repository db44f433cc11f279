//! Run lifecycle: fresh start, continuation, interruption and shutdown.
//!
//! [`RunManager`] owns one run end to end. It opens the state store (taking
//! the run lock), decides between a fresh start and a continuation, gates
//! fresh runs on design validation and a single planning call, then drives
//! the worker pool and the judge until the judge reports completion or the
//! interrupt signal fires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::adapters::llm::{
    LlmBackend, LlmChallengeGenerator, LlmCritic, LlmEvaluator, LlmPlanner, LlmValidator,
};
use crate::adapters::substrates::{ClaudeCodeConfig, ClaudeCodeRunner, CodexConfig, CodexRunner};
use crate::domain::errors::PlanError;
use crate::domain::models::{
    materialize_drafts, CancelSignal, CancellationSource, Config, DesignChange, Task, TaskStatus,
    WorkState,
};
use crate::domain::ports::{
    AgentRunner, ChallengeGenerator, Critic, DesignValidator, Planner, TaskEvaluator,
};
use crate::services::critique::{CritiqueBackends, CritiqueLimits, CritiquePipeline};
use crate::services::judge::{Judge, JudgeExit, JudgeSettings};
use crate::services::state_store::{StateStore, StatusCounts};
use crate::services::task_queue::TaskQueue;
use crate::services::worker_pool::{
    effective_worker_count, WorkerContext, WorkerPool, WorkerSettings,
};

use super::design::DesignSource;
use super::skills::{default_skills_dir, format_skills, load_skills};

const REJECTION_FILE: &str = "REJECTION.md";
const PROJECT_FILE: &str = "PROJECT.md";
/// Fingerprint of the last design that passed validation
const VALIDATED_FILE: &str = "validated";
const EVALUATOR_MAX_TURNS: u32 = 8;

/// External collaborators of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn AgentRunner>,
    pub planner: Arc<dyn Planner>,
    pub validator: Arc<dyn DesignValidator>,
    pub evaluator: Option<Arc<dyn TaskEvaluator>>,
    pub critique: CritiqueBackends,
}

impl Collaborators {
    /// Production wiring: Claude Code for workers, planning, judgment and the
    /// replanner/verifier; Codex for the refiner. Every call made on behalf of
    /// the judge observes `cancel`.
    pub fn from_config(config: &Config, cancel: &CancelSignal) -> Self {
        let claude: Arc<dyn AgentRunner> =
            Arc::new(ClaudeCodeRunner::new(ClaudeCodeConfig::from_config(config)));
        let codex: Arc<dyn AgentRunner> =
            Arc::new(CodexRunner::new(CodexConfig::from_config(config)));
        let secs = Duration::from_secs;
        let task_timeout = secs(config.task_timeout_secs);

        let backend = |runner: &Arc<dyn AgentRunner>, timeout: Duration| {
            LlmBackend::new(Arc::clone(runner), timeout).with_cancel(cancel.clone())
        };

        let refiner = config.critique.refiner_enabled.then(|| {
            Arc::new(LlmCritic::refiner(backend(
                &codex,
                secs(config.critique.refine_timeout_secs),
            ))) as Arc<dyn Critic>
        });
        let verifier = config.adversarial.enabled.then(|| {
            Arc::new(LlmChallengeGenerator::new(backend(
                &claude,
                secs(config.adversarial.timeout_secs),
            ))) as Arc<dyn ChallengeGenerator>
        });

        Self {
            planner: Arc::new(LlmPlanner::new(
                backend(&claude, task_timeout).with_max_turns(config.max_turns),
            )),
            validator: Arc::new(LlmValidator::new(backend(&claude, task_timeout))),
            evaluator: Some(Arc::new(LlmEvaluator::new(
                backend(&claude, secs(config.critique.judge_timeout_secs))
                    .with_max_turns(EVALUATOR_MAX_TURNS),
            ))),
            critique: CritiqueBackends {
                refiner,
                replanner: Arc::new(LlmCritic::replanner(backend(
                    &claude,
                    secs(config.critique.replan_timeout_secs),
                ))),
                verifier,
            },
            runner: claude,
        }
    }
}

/// Per-invocation options of `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Design arguments (files, a directory, or inline text)
    pub design_args: Vec<String>,
    /// Wipe existing state first
    pub fresh: bool,
    /// Operator worker-count override
    pub workers: Option<usize>,
    pub skip_validation: bool,
    /// Validate the design and stop
    pub check_only: bool,
}

/// A failed or cascade-failed task in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub error: String,
}

/// Final tally of a run that reached the worker phase.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub counts: StatusCounts,
    pub failures: Vec<FailedTask>,
    pub critique_passes: u32,
    pub workers: usize,
}

impl RunReport {
    fn from_tasks(tasks: &[Task], critique_passes: u32, workers: usize) -> Self {
        let failures = tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::CascadeFailed))
            .map(|t| FailedTask {
                id: t.short_id(),
                description: t.description.clone(),
                status: t.status,
                error: t.error.clone(),
            })
            .collect();
        Self {
            counts: StatusCounts::tally(tasks),
            failures,
            critique_passes,
            workers,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The judge marked the work complete
    Finished(RunReport),
    /// The interrupt signal fired; state is left for continuation
    Interrupted(RunReport),
    /// A previous run already completed this work
    AlreadyComplete(StatusCounts),
    /// The validator rejected the design; gaps were written to `path`
    Rejected { path: PathBuf, gaps: Vec<String> },
    /// `--check`: the design was validated (or validation skipped) and nothing ran
    Checked,
}

impl RunOutcome {
    /// Process exit status: non-zero when unrecoverable work remains.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Finished(report) if report.failures.is_empty() => 0,
            Self::Finished(_) | Self::Rejected { .. } => 1,
            Self::Interrupted(_) => 130,
            Self::AlreadyComplete(_) | Self::Checked => 0,
        }
    }
}

pub struct RunManager {
    config: Config,
    project_root: PathBuf,
    collaborators: Collaborators,
}

impl RunManager {
    pub fn new(
        config: Config,
        project_root: impl Into<PathBuf>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            collaborators,
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.project_root.join(&self.config.data_dir)
    }

    fn skills(&self) -> String {
        let dir = self.config.agent.skills_dir.clone().or_else(default_skills_dir);
        dir.map(|dir| format_skills(&load_skills(&dir)))
            .unwrap_or_default()
    }

    /// Run until the judge is done or `interrupt` fires.
    #[instrument(skip_all, fields(fresh = options.fresh))]
    pub async fn run(&self, options: RunOptions, interrupt: CancelSignal) -> Result<RunOutcome> {
        let data_dir = self.data_dir();
        let store = Arc::new(
            StateStore::open(&data_dir)
                .await
                .with_context(|| format!("cannot open state in {}", data_dir.display()))?,
        );

        if options.fresh {
            store.clear().await.context("failed to wipe state")?;
            info!("fresh: wiped state");
        }

        let mut continuing =
            !options.fresh && !options.check_only && store.work().await.is_some();
        if continuing {
            if let Some(design) = self.changed_design(&store, &options.design_args).await {
                continuing = self.review_design_change(&store, &design).await?;
            }
        }

        if continuing {
            let counts = store.snapshot().await.counts();
            match store.work().await {
                Some(work) if work.is_complete => {
                    info!(
                        completed = counts.completed,
                        total = counts.total(),
                        "work already complete"
                    );
                    return Ok(RunOutcome::AlreadyComplete(counts));
                }
                Some(work) => info!(design = %work.design_file, "continuing previous run"),
                None => bail!("no previous run found"),
            }
            store
                .reset_interrupted()
                .await
                .context("failed to reset interrupted tasks")?;
            if store.tasks().await.is_empty() {
                bail!("no tasks in saved state; re-run with --fresh to re-plan");
            }
        } else if let Some(outcome) = self.start_fresh(&store, &options).await? {
            return Ok(outcome);
        }

        self.execute(store, options.workers, interrupt).await
    }

    /// Validate, plan and persist a new run. Returns an outcome when the run
    /// stops before any work starts.
    async fn start_fresh(
        &self,
        store: &StateStore,
        options: &RunOptions,
    ) -> Result<Option<RunOutcome>> {
        let design = DesignSource::discover(&self.project_root, &options.design_args)?;
        let data_dir = self.data_dir();

        let spec_hash = design.fingerprint();
        let validated_path = data_dir.join(VALIDATED_FILE);
        let already_validated = tokio::fs::read_to_string(&validated_path)
            .await
            .is_ok_and(|saved| saved.trim() == spec_hash);

        let mut goal_text = design.goal_text.clone();
        if options.skip_validation {
            info!("skipping design validation");
            save_validated(&validated_path, &spec_hash).await?;
        } else if already_validated {
            info!("design already validated");
        } else {
            info!("validating design");
            let outcome = self
                .collaborators
                .validator
                .validate(&design.goal_text)
                .await
                .context("design validation failed")?;
            if !outcome.accepted {
                let path = data_dir.join(REJECTION_FILE);
                tokio::fs::write(&path, outcome.rejection_markdown())
                    .await
                    .with_context(|| format!("cannot write {}", path.display()))?;
                warn!(gaps = outcome.gaps.len(), path = %path.display(), "design rejected");
                return Ok(Some(RunOutcome::Rejected {
                    path,
                    gaps: outcome.gaps,
                }));
            }
            save_validated(&validated_path, &spec_hash).await?;
            let project = outcome.project.trim();
            if !project.is_empty() {
                let path = data_dir.join(PROJECT_FILE);
                tokio::fs::write(&path, format!("{project}\n"))
                    .await
                    .with_context(|| format!("cannot write {}", path.display()))?;
                goal_text = format!("{goal_text}\n\n---\n\n# PROJECT\n\n{project}\n");
            }
            info!("design accepted");
        }

        if options.check_only {
            return Ok(Some(RunOutcome::Checked));
        }

        info!(design = %design.label, "planning tasks");
        let plan = self
            .collaborators
            .planner
            .plan(&goal_text)
            .await
            .context("planning failed")?;
        let tasks = materialize_drafts(&plan.tasks);
        if tasks.is_empty() {
            return Err(PlanError::Empty).context("no tasks generated from design");
        }

        store
            .init_work(
                WorkState::new(&design.label, goal_text.clone()).with_spec_hash(spec_hash),
            )
            .await
            .context("failed to initialize work state")?;
        let count = tasks.len();
        store.add_tasks(tasks).await.context("failed to store plan")?;
        store
            .mutate(|state| {
                let work = state.work_mut()?;
                work.project_context = plan.context.clone();
                if let Some(mode) = plan.mode {
                    work.execution_mode = mode;
                }
                Ok(())
            })
            .await
            .context("failed to record plan context")?;
        info!(tasks = count, "plan stored");
        Ok(None)
    }

    /// The current design, when it differs from the one the saved run was
    /// planned from. Runs saved without a fingerprint, or with no design on
    /// disk now, never count as changed.
    async fn changed_design(
        &self,
        store: &StateStore,
        design_args: &[String],
    ) -> Option<DesignSource> {
        let saved = store.work().await?.spec_hash;
        if saved.is_empty() {
            return None;
        }
        let design = DesignSource::discover(&self.project_root, design_args).ok()?;
        (design.fingerprint() != saved).then_some(design)
    }

    /// Ask the planner whether saved work survives a design edit. Returns
    /// whether the run continues; on replan the store is wiped.
    async fn review_design_change(
        &self,
        store: &StateStore,
        design: &DesignSource,
    ) -> Result<bool> {
        info!(design = %design.label, "design changed since the saved run");
        let tasks = store.tasks().await;
        let decision = match self
            .collaborators
            .planner
            .review_change(&tasks, &design.goal_text)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "design change review failed, replanning");
                DesignChange::Replan
            }
        };

        match decision {
            DesignChange::Keep => {
                let goal_text = design.goal_text.clone();
                let spec_hash = design.fingerprint();
                let label = design.label.clone();
                store
                    .mutate(move |state| {
                        let work = state.work_mut()?;
                        work.goal_text = goal_text;
                        work.spec_hash = spec_hash;
                        work.design_file = label;
                        work.touch();
                        Ok(())
                    })
                    .await
                    .context("failed to record the new design")?;
                info!("design change keeps completed work");
                Ok(true)
            }
            DesignChange::Replan => {
                store.clear().await.context("failed to wipe state")?;
                info!("design change requires a new plan");
                Ok(false)
            }
        }
    }

    async fn execute(
        &self,
        store: Arc<StateStore>,
        workers_override: Option<usize>,
        interrupt: CancelSignal,
    ) -> Result<RunOutcome> {
        let queue = Arc::new(TaskQueue::new());
        let pending = store.pending_ids().await;
        queue.extend(pending.iter().copied()).await;

        let work = store
            .work()
            .await
            .context("work state missing after startup")?;
        let count = effective_worker_count(
            self.config.workers,
            workers_override,
            work.execution_mode,
            pending.len(),
        );
        let counts = store.snapshot().await.counts();
        info!(
            workers = count,
            mode = %work.execution_mode,
            completed = counts.completed,
            total = counts.total(),
            "starting run"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker_cancel = CancellationSource::new();
        let judge_cancel = CancellationSource::new();

        let pool = WorkerPool::spawn(
            count,
            WorkerContext {
                store: Arc::clone(&store),
                queue: Arc::clone(&queue),
                runner: Arc::clone(&self.collaborators.runner),
                events: events_tx,
                settings: WorkerSettings {
                    task_timeout: Duration::from_secs(self.config.task_timeout_secs),
                    max_turns: self.config.max_turns,
                    dependency_backoff: Duration::from_millis(self.config.dependency_backoff_ms),
                    project_context: work.project_context.clone(),
                    skills: self.skills(),
                },
            },
            &worker_cancel.signal(),
        );

        let pipeline = CritiquePipeline::new(
            self.collaborators.critique.clone(),
            CritiqueLimits::from_config(&self.config),
        );
        let mut judge = Judge::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            events_rx,
            pipeline,
            JudgeSettings {
                poll_interval: Duration::from_millis(self.config.poll_interval_ms),
                max_retries: self.config.max_retries,
                evaluate_timeout: Duration::from_secs(self.config.critique.judge_timeout_secs),
            },
        );
        if let Some(evaluator) = &self.collaborators.evaluator {
            judge = judge.with_evaluator(Arc::clone(evaluator));
        }

        let judge_run = judge.run(judge_cancel.signal());
        tokio::pin!(judge_run);
        let judged = select! {
            result = &mut judge_run => result,
            () = interrupt.cancelled() => {
                warn!("interrupted, stopping workers and judge");
                judge_cancel.cancel();
                worker_cancel.cancel();
                (&mut judge_run).await
            }
        };

        worker_cancel.cancel();
        pool.join().await;
        let report = judged.context("judge failed")?;

        let summary = RunReport::from_tasks(&store.tasks().await, report.critique_passes, count);
        match report.exit {
            JudgeExit::Completed => {
                info!(
                    completed = summary.counts.completed,
                    failed = summary.failures.len(),
                    passes = summary.critique_passes,
                    "run finished"
                );
                Ok(RunOutcome::Finished(summary))
            }
            JudgeExit::Cancelled => Ok(RunOutcome::Interrupted(summary)),
        }
    }
}

async fn save_validated(path: &Path, spec_hash: &str) -> Result<()> {
    tokio::fs::write(path, spec_hash)
        .await
        .with_context(|| format!("cannot write {}", path.display()))
}

/// Fire `source` on Ctrl-C or SIGTERM.
pub fn install_interrupt_handler(source: CancellationSource) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    tokio::spawn(async move {
        select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
            _ = term.recv() => info!("received SIGTERM"),
        }
        source.cancel();
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus, error: &str) -> Task {
        let mut task = Task::new(format!("{status} task"));
        task.status = status;
        task.error = error.to_string();
        task
    }

    #[test]
    fn test_report_collects_failures() {
        let tasks = vec![
            task(TaskStatus::Completed, ""),
            task(TaskStatus::Failed, "boom"),
            task(TaskStatus::CascadeFailed, "dependency 1234abcd failed"),
        ];
        let report = RunReport::from_tasks(&tasks, 2, 4);
        assert_eq!(report.counts.completed, 1);
        assert_eq!(report.counts.cascade_failed, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].error, "boom");
    }

    #[test]
    fn test_exit_codes() {
        let clean = RunReport::from_tasks(&[task(TaskStatus::Completed, "")], 1, 1);
        let dirty = RunReport::from_tasks(&[task(TaskStatus::CascadeFailed, "x")], 1, 1);
        assert_eq!(RunOutcome::Finished(clean.clone()).exit_code(), 0);
        assert_eq!(RunOutcome::Finished(dirty).exit_code(), 1);
        assert_eq!(RunOutcome::Interrupted(clean).exit_code(), 130);
        assert_eq!(RunOutcome::Checked.exit_code(), 0);
        assert_eq!(
            RunOutcome::Rejected {
                path: PathBuf::from("x"),
                gaps: vec![]
            }
            .exit_code(),
            1
        );
    }
}
