//! Judge loop: the scheduler state machine.
//!
//! The judge wakes on a fixed interval. Each cycle it drains worker
//! notifications, judges newly completed tasks, applies the retry / cascade
//! policy to failures, and once the run is settled hands over to the critique
//! pipeline. Polling only bounds how quickly changes are noticed; every state
//! change itself is serialized by the store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{CritiqueError, StoreResult};
use crate::domain::models::{
    materialize_drafts, CancelSignal, CritiqueContext, Task, TaskStatus, TaskVerdict, Verdict,
};
use crate::domain::ports::TaskEvaluator;
use crate::services::critique::{CritiquePipeline, PassOutcome, StageCall};
use crate::services::state_store::{RetryDecision, StateSnapshot, StateStore};
use crate::services::task_queue::TaskQueue;
use crate::services::worker_pool::{EventReceiver, TaskEvent};

/// Judge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgePhase {
    /// Work is outstanding
    Accumulating,
    /// Settled; the critique pipeline is deciding whether more work is needed
    Critiquing,
    /// Completion recorded
    Done,
}

impl JudgePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accumulating => "accumulating",
            Self::Critiquing => "critiquing",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JudgeSettings {
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub evaluate_timeout: Duration,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            max_retries: 10,
            evaluate_timeout: Duration::from_secs(45),
        }
    }
}

/// How the judge loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeExit {
    Completed,
    Cancelled,
}

/// What the judge observed over a run.
#[derive(Debug, Clone)]
pub struct JudgeReport {
    pub exit: JudgeExit,
    pub critique_passes: u32,
    pub verdicts: Vec<TaskVerdict>,
    pub stage_calls: Vec<StageCall>,
}

pub struct Judge {
    store: Arc<StateStore>,
    queue: Arc<TaskQueue>,
    events: EventReceiver,
    evaluator: Option<Arc<dyn TaskEvaluator>>,
    pipeline: CritiquePipeline,
    settings: JudgeSettings,
    phase: JudgePhase,
    judged: HashSet<Uuid>,
    verdicts: Vec<TaskVerdict>,
}

impl Judge {
    pub fn new(
        store: Arc<StateStore>,
        queue: Arc<TaskQueue>,
        events: EventReceiver,
        pipeline: CritiquePipeline,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            store,
            queue,
            events,
            evaluator: None,
            pipeline,
            settings,
            phase: JudgePhase::Accumulating,
            judged: HashSet::new(),
            verdicts: Vec::new(),
        }
    }

    /// Enable narrow per-task judgment.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn TaskEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn verdicts(&self) -> &[TaskVerdict] {
        &self.verdicts
    }

    /// Poll until done or cancelled.
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: CancelSignal) -> StoreResult<JudgeReport> {
        info!(interval_ms = self.settings.poll_interval.as_millis(), "judge monitoring");
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            select! {
                biased;
                () = cancel.cancelled() => break JudgeExit::Cancelled,
                _ = ticker.tick() => {}
            }
            // A cycle runs to completion; cancellation is observed between cycles
            // and inside critique calls.
            let phase = select! {
                biased;
                () = cancel.cancelled() => break JudgeExit::Cancelled,
                phase = self.poll_once() => phase?,
            };
            if phase == JudgePhase::Done {
                break JudgeExit::Completed;
            }
        };

        info!(exit = ?exit, passes = self.pipeline.passes(), "judge stopped");
        Ok(JudgeReport {
            exit,
            critique_passes: self.pipeline.passes(),
            verdicts: self.verdicts,
            stage_calls: self.pipeline.history().to_vec(),
        })
    }

    /// Run one judge cycle and return the resulting phase.
    pub async fn poll_once(&mut self) -> StoreResult<JudgePhase> {
        if self.phase == JudgePhase::Done {
            return Ok(self.phase);
        }

        let (completed, failed) = self.drain_events();
        for id in completed {
            self.judge_completed(id).await;
        }
        self.handle_failures(failed).await?;

        let snapshot = self.store.snapshot().await;
        // Notifications are at-least-once; failures that never produced one
        // (or were left by an earlier process) are picked up here.
        let stragglers = snapshot.ids_with_status(TaskStatus::Failed);
        if !stragglers.is_empty() {
            self.handle_failures(stragglers).await?;
            self.phase = JudgePhase::Accumulating;
            return Ok(self.phase);
        }

        if !snapshot.is_settled() {
            self.phase = JudgePhase::Accumulating;
            return Ok(self.phase);
        }

        if self.phase != JudgePhase::Critiquing {
            info!(tasks = snapshot.tasks.len(), "run settled, critiquing");
        }
        self.phase = JudgePhase::Critiquing;
        let context = self.critique_context(&snapshot);
        match self.pipeline.run_pass(&context).await {
            PassOutcome::NewTasks { stage, drafts } => {
                let tasks = materialize_drafts(&drafts);
                let ids = self.store.add_tasks(tasks).await?;
                let added = self.queue.extend(ids.iter().copied()).await;
                info!(stage = %stage, tasks = added, "critique tasks enqueued");
                self.phase = JudgePhase::Accumulating;
            }
            PassOutcome::Inconclusive { stage } => {
                debug!(stage = %stage, "critique inconclusive, retrying next cycle");
            }
            PassOutcome::Exhausted => {
                if self.store.mark_complete().await? {
                    info!("work marked complete");
                }
                self.phase = JudgePhase::Done;
            }
        }
        Ok(self.phase)
    }

    /// Ids that completed and failed since the last cycle, deduplicated.
    fn drain_events(&mut self) -> (Vec<Uuid>, Vec<Uuid>) {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(TaskEvent::Completed { task_id }) => {
                    if !completed.contains(&task_id) {
                        completed.push(task_id);
                    }
                }
                Ok(TaskEvent::Failed { task_id }) => {
                    if !failed.contains(&task_id) {
                        failed.push(task_id);
                    }
                }
                Ok(TaskEvent::Started { task_id, worker }) => {
                    debug!(task_id = %task_id, worker = %worker, "task picked up");
                }
                Ok(TaskEvent::Progress {
                    task_id,
                    worker,
                    message,
                }) => {
                    info!(task_id = %task_id, worker = %worker, "{message}");
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        (completed, failed)
    }

    async fn judge_completed(&mut self, id: Uuid) {
        if !self.judged.insert(id) {
            return;
        }
        let Some(evaluator) = self.evaluator.clone() else {
            return;
        };
        let Some(task) = self.store.task(id).await else {
            return;
        };
        if task.status != TaskStatus::Completed {
            return;
        }

        let verdict = match tokio::time::timeout(
            self.settings.evaluate_timeout,
            evaluator.evaluate(&task),
        )
        .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(err)) => Verdict::Inconclusive(err.to_string()),
            Err(_) => Verdict::Inconclusive(
                CritiqueError::Timeout(self.settings.evaluate_timeout.as_secs()).to_string(),
            ),
        };
        match &verdict {
            Verdict::Unsatisfied(note) => {
                warn!(task_id = %id, note = %note, "judge: task result does not match description");
            }
            Verdict::Inconclusive(note) => debug!(task_id = %id, note = %note, "judge skipped"),
            Verdict::Satisfied => debug!(task_id = %id, "judge: satisfied"),
        }
        self.verdicts.push(TaskVerdict {
            task_id: id,
            description: task.description,
            verdict,
        });
    }

    async fn handle_failures(&mut self, ids: Vec<Uuid>) -> StoreResult<()> {
        for id in ids {
            match self
                .store
                .retry_or_exhaust(id, self.settings.max_retries)
                .await?
            {
                RetryDecision::Retried { attempt } => {
                    info!(task_id = %id, attempt, max = self.settings.max_retries, "retrying task");
                    self.queue.enqueue(id).await;
                }
                RetryDecision::Exhausted { cascaded } => {
                    warn!(
                        task_id = %id,
                        cascaded = cascaded.len(),
                        "retries exhausted, cascading to dependents"
                    );
                }
                RetryDecision::Skipped => {}
            }
        }
        Ok(())
    }

    fn critique_context(&self, snapshot: &StateSnapshot) -> CritiqueContext {
        let (goal_text, project_context) = snapshot
            .work
            .as_ref()
            .map(|w| (w.goal_text.clone(), w.project_context.clone()))
            .unwrap_or_default();
        let by_status = |pred: fn(&Task) -> bool| -> Vec<Task> {
            snapshot.tasks.iter().filter(|t| pred(t)).cloned().collect()
        };
        CritiqueContext {
            goal_text,
            project_context,
            completed: by_status(|t| t.status == TaskStatus::Completed),
            failed: by_status(|t| {
                matches!(t.status, TaskStatus::Failed | TaskStatus::CascadeFailed)
            }),
            verdicts: self.verdicts.clone(),
            issued_challenges: self.pipeline.issued_challenges().to_vec(),
        }
    }
}
