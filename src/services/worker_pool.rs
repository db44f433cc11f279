//! Worker pool: N cooperative executors draining the task queue.
//!
//! Each worker re-checks eligibility on every dequeue, hands back tasks it may
//! not run, invokes the agent runner, and writes the outcome through the state
//! store before notifying the judge. Workers share nothing but the store, the
//! queue and the event channel.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{AgentError, StoreError};
use crate::domain::models::{
    truncate_chars, AgentOutput, AgentRequest, CancelSignal, ExecutionMode, Task, TaskStatus,
};
use crate::domain::ports::AgentRunner;
use crate::services::output_parser::{
    parse_worker_output, reached_max_turns, WorkerOutput, WorkerStatus,
};
use crate::services::state_store::{StateStore, TaskReport};
use crate::services::task_queue::TaskQueue;

/// Pause before a pinned task handed back to the queue can be picked up again.
const PIN_HANDBACK_DELAY: Duration = Duration::from_millis(50);

/// Budget for the reformat and summarize follow-ups on an existing session.
const FOLLOW_UP_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra time the hard ceiling grants over the runner's own timeout.
const CEILING_SLACK: Duration = Duration::from_secs(30);

const SUMMARY_CHARS: usize = 120;

/// Notifications from workers to the judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started { task_id: Uuid, worker: String },
    Progress { task_id: Uuid, worker: String, message: String },
    Completed { task_id: Uuid },
    Failed { task_id: Uuid },
}

pub type EventSender = mpsc::UnboundedSender<TaskEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

/// Tunables for one run's workers.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub task_timeout: Duration,
    pub max_turns: u32,
    pub dependency_backoff: Duration,
    /// Prepended to every task prompt
    pub project_context: String,
    /// Formatted skills block, empty when none were found
    pub skills: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(900),
            max_turns: 25,
            dependency_backoff: Duration::from_millis(1000),
            project_context: String::new(),
            skills: String::new(),
        }
    }
}

/// Everything a worker needs, shared by the whole pool.
pub struct WorkerContext {
    pub store: Arc<StateStore>,
    pub queue: Arc<TaskQueue>,
    pub runner: Arc<dyn AgentRunner>,
    pub events: EventSender,
    pub settings: WorkerSettings,
}

/// Number of workers to start.
///
/// An explicit operator override always wins. Otherwise sequential mode runs
/// one worker, and parallel mode runs no more workers than there are pending
/// tasks (but at least one).
pub fn effective_worker_count(
    configured: usize,
    override_count: Option<usize>,
    mode: ExecutionMode,
    pending: usize,
) -> usize {
    if let Some(count) = override_count {
        return count.max(1);
    }
    match mode {
        ExecutionMode::Sequential => 1,
        ExecutionMode::Parallel => configured.min(pending.max(1)).max(1),
    }
}

/// Handle on the running workers.
pub struct WorkerPool {
    worker_ids: Vec<String>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers named `w0..w{count-1}`.
    pub fn spawn(count: usize, context: WorkerContext, cancel: &CancelSignal) -> Self {
        let worker_ids: Vec<String> = (0..count).map(|i| format!("w{i}")).collect();
        let shared = Arc::new(Shared {
            context,
            worker_ids: worker_ids.clone(),
        });

        let handles = worker_ids
            .iter()
            .map(|id| {
                let worker = Worker {
                    id: id.clone(),
                    shared: Arc::clone(&shared),
                };
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect();

        info!(workers = count, "worker pool started");
        Self {
            worker_ids,
            handles,
        }
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to stop. Call after firing their cancel signal.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "worker panicked");
                }
            }
        }
        debug!("worker pool stopped");
    }
}

struct Shared {
    context: WorkerContext,
    worker_ids: Vec<String>,
}

/// Outcome of one attempt, before it is written to the store.
enum Attempt {
    Completed(TaskReport),
    Failed(TaskReport),
    Cancelled,
}

struct Worker {
    id: String,
    shared: Arc<Shared>,
}

impl Worker {
    fn ctx(&self) -> &WorkerContext {
        &self.shared.context
    }

    #[instrument(skip_all, fields(worker = %self.id))]
    async fn run(self, cancel: CancelSignal) {
        debug!("worker starting");
        loop {
            let task_id = select! {
                biased;
                () = cancel.cancelled() => break,
                id = self.ctx().queue.dequeue() => id,
            };

            match self.handle(task_id, &cancel).await {
                Ok(()) => {}
                Err(e) => {
                    // Store I/O failure: the task keeps its last durable status
                    error!(task_id = %task_id, error = %e, "failed to record task outcome");
                }
            }
        }
        debug!("worker stopping");
    }

    async fn handle(&self, task_id: Uuid, cancel: &CancelSignal) -> Result<(), StoreError> {
        let ctx = self.ctx();
        let Some(task) = ctx.store.task(task_id).await else {
            warn!(task_id = %task_id, "dequeued unknown task");
            return Ok(());
        };
        if task.status != TaskStatus::Pending {
            debug!(task_id = %task_id, status = %task.status, "skipping stale queue entry");
            return Ok(());
        }

        // Dependency blocking takes precedence over pin hand-back.
        if !ctx.store.dependencies_met(task_id).await? {
            debug!(task_id = %task_id, "dependencies unmet, deferring");
            select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(ctx.settings.dependency_backoff) => {}
            }
            ctx.queue.enqueue(task_id).await;
            return Ok(());
        }

        if let Some(pin) = task.worker.pinned() {
            if pin != self.id && self.shared.worker_ids.iter().any(|id| id == pin) {
                ctx.queue.enqueue(task_id).await;
                tokio::task::yield_now().await;
                tokio::time::sleep(PIN_HANDBACK_DELAY).await;
                return Ok(());
            }
        }

        let task = ctx.store.start_task(task_id).await?;
        info!(task_id = %task_id, description = %truncate_chars(&task.description, 60), "task started");
        let _ = ctx.events.send(TaskEvent::Started {
            task_id,
            worker: self.id.clone(),
        });

        match self.attempt(&task, cancel).await {
            Attempt::Completed(report) => {
                ctx.store.complete_task(task_id, report).await?;
                info!(task_id = %task_id, "task completed");
                let _ = ctx.events.send(TaskEvent::Completed { task_id });
            }
            Attempt::Failed(report) => {
                warn!(task_id = %task_id, error = %report.error, "task failed");
                ctx.store.fail_task(task_id, report).await?;
                let _ = ctx.events.send(TaskEvent::Failed { task_id });
            }
            Attempt::Cancelled => {
                // Left running; continuation resets it to pending.
                info!(task_id = %task_id, "task interrupted");
            }
        }
        Ok(())
    }

    async fn attempt(&self, task: &Task, cancel: &CancelSignal) -> Attempt {
        let ctx = self.ctx();
        let settings = &ctx.settings;

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_progress(
            progress_rx,
            ctx.events.clone(),
            task.id,
            self.id.clone(),
        ));

        let request = AgentRequest::new(worker_prompt(task, settings), settings.task_timeout)
            .with_max_turns(settings.max_turns)
            .with_progress(progress_tx)
            .with_cancel(cancel.clone())
            .with_resume(&task.session_id);

        let ceiling = settings.task_timeout + CEILING_SLACK;
        let result = match tokio::time::timeout(ceiling, ctx.runner.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                secs: ceiling.as_secs(),
                partial: String::new(),
                session_id: String::new(),
            }),
        };
        // The request (and its sender) is gone, so the forwarder drains and exits.
        let _ = forwarder.await;

        match result {
            Ok(output) => self.interpret(output, cancel).await,
            Err(AgentError::Cancelled) => Attempt::Cancelled,
            Err(err) => {
                if cancel.is_cancelled() {
                    return Attempt::Cancelled;
                }
                Attempt::Failed(self.failure_report(&err, cancel).await)
            }
        }
    }

    /// Turn successful runner output into a completion or a failure.
    async fn interpret(&self, output: AgentOutput, cancel: &CancelSignal) -> Attempt {
        if reached_max_turns(&output.text) {
            return Attempt::Failed(TaskReport {
                result: output.text.clone(),
                summary: "reached max turns".to_string(),
                session_id: output.session_id,
                followups: Vec::new(),
                error: "reached max turns".to_string(),
            });
        }

        let mut parsed = parse_worker_output(&output.text);
        if !parsed.is_structured() && !output.session_id.is_empty() {
            if let Some(reformatted) = self.reformat(&output.session_id, cancel).await {
                parsed = reformatted;
            }
        }

        let summary = parsed
            .summary
            .clone()
            .unwrap_or_else(|| first_line_summary(&output.text));
        let WorkerOutput {
            status, followups, ..
        } = parsed;

        let report = TaskReport {
            result: output.text,
            summary,
            session_id: output.session_id,
            followups,
            error: String::new(),
        };
        match status {
            Some(WorkerStatus::Partial) => Attempt::Failed(TaskReport {
                error: "worker reported partial".to_string(),
                ..report
            }),
            // Missing status after the reformat retry degrades to raw text.
            Some(WorkerStatus::Done) | None => Attempt::Completed(report),
        }
    }

    async fn reformat(&self, session_id: &str, cancel: &CancelSignal) -> Option<WorkerOutput> {
        debug!(session_id, "output lacks structured tags, requesting reformat");
        let resumed = select! {
            () = cancel.cancelled() => return None,
            r = self.ctx().runner.resume(session_id, REFORMAT_PROMPT, FOLLOW_UP_TIMEOUT) => r,
        };
        match resumed {
            Ok(text) => Some(parse_worker_output(&text)).filter(WorkerOutput::is_structured),
            Err(e) => {
                warn!(session_id, error = %e, "reformat failed, falling back to raw output");
                None
            }
        }
    }

    /// Best available diagnostic for a failed attempt: a summary from the
    /// resumed session, else the partial output, else the error text.
    async fn failure_report(&self, err: &AgentError, cancel: &CancelSignal) -> TaskReport {
        let session_id = err.session_id().to_string();
        let partial = err.partial().to_string();

        let mut diagnostic = String::new();
        if !session_id.is_empty() {
            let prompt = summarize_prompt(&partial);
            let resumed = select! {
                () = cancel.cancelled() => None,
                r = self.ctx().runner.resume(&session_id, &prompt, FOLLOW_UP_TIMEOUT) => Some(r),
            };
            match resumed {
                Some(Ok(text)) if !text.trim().is_empty() => diagnostic = text,
                Some(Err(e)) => warn!(session_id = %session_id, error = %e, "summarize failed"),
                _ => {}
            }
        }
        if diagnostic.is_empty() {
            diagnostic = partial;
        }
        if diagnostic.is_empty() {
            diagnostic = err.to_string();
        }

        let parsed = parse_worker_output(&diagnostic);
        TaskReport {
            summary: parsed
                .summary
                .unwrap_or_else(|| first_line_summary(&diagnostic)),
            followups: parsed.followups,
            result: diagnostic,
            session_id,
            error: err.to_string(),
        }
    }
}

async fn forward_progress(
    mut rx: mpsc::UnboundedReceiver<String>,
    events: EventSender,
    task_id: Uuid,
    worker: String,
) {
    while let Some(message) = rx.recv().await {
        debug!(task_id = %task_id, worker = %worker, progress = %message);
        let _ = events.send(TaskEvent::Progress {
            task_id,
            worker: worker.clone(),
            message,
        });
    }
}

fn first_line_summary(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    truncate_chars(line, SUMMARY_CHARS)
}

fn worker_prompt(task: &Task, settings: &WorkerSettings) -> String {
    let mut prompt = String::new();
    if !settings.project_context.is_empty() {
        prompt.push_str(&format!("Project: {}\n\n", settings.project_context));
    }
    if !settings.skills.is_empty() {
        prompt.push_str(&settings.skills);
        prompt.push_str("\n\nUse the relevant skills above for this task.\n\n");
    }
    prompt.push_str(&format!(
        "You have a {}-minute timeout. If you time out, the task will be retried \
         automatically. Focus on making progress.\n\n",
        (settings.task_timeout.as_secs() / 60).max(1)
    ));
    prompt.push_str(&format!("Task: {}\n\n", task.description));
    if task.retries > 0 && !task.error.is_empty() {
        prompt.push_str(&format!(
            "A previous attempt failed ({}).",
            truncate_chars(&task.error, 200)
        ));
        if !task.summary.is_empty() {
            prompt.push_str(&format!(
                " Its summary: {}",
                truncate_chars(&task.summary, 400)
            ));
        }
        prompt.push_str(" Take a different approach if needed.\n\n");
    }
    prompt.push_str(
        "While working, report milestones as <progress>what you are doing</progress>.\n\n\
         When done, append a 1-line summary to LOG.md (create if missing). \
         Format: `- <what you shipped>`.\n\n\
         Then output this structured block:\n\
         <summary>3-5 word outcome</summary>\n\
         <status>done</status>\n\n\
         If you could NOT fully complete the task, output:\n\
         <summary>3-5 word outcome</summary>\n\
         <status>partial</status>\n\
         <followups>\n<task>description of remaining work</task>\n</followups>",
    );
    prompt
}

const REFORMAT_PROMPT: &str = "Your previous response is complete. \
Now emit ONLY the required structured tags, nothing else:\n\n\
If the work is done:\n\
<summary>3-5 word outcome</summary>\n\
<status>done</status>\n\n\
If work was incomplete:\n\
<summary>3-5 word outcome</summary>\n\
<status>partial</status>\n\
<followups>\n<task>remaining work description</task>\n</followups>";

fn summarize_prompt(partial: &str) -> String {
    let context = if partial.is_empty() {
        String::new()
    } else {
        format!("\n\nYour partial output:\n{}", truncate_chars(partial, 600))
    };
    format!(
        "You were interrupted before finishing your task.{context}\n\n\
         Summarize in 3-5 lines:\n\
         1. What you completed\n\
         2. What remains\n\
         3. Any errors or blockers\n\n\
         Then output:\n\
         <status>partial</status>\n\
         <followups>\n<task>description of remaining work</task>\n</followups>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_worker_count() {
        // explicit override wins, even in sequential mode
        assert_eq!(effective_worker_count(4, Some(8), ExecutionMode::Sequential, 2), 8);
        assert_eq!(effective_worker_count(4, None, ExecutionMode::Sequential, 10), 1);
        assert_eq!(effective_worker_count(4, None, ExecutionMode::Parallel, 2), 2);
        assert_eq!(effective_worker_count(4, None, ExecutionMode::Parallel, 10), 4);
        assert_eq!(effective_worker_count(4, None, ExecutionMode::Parallel, 0), 1);
    }

    #[test]
    fn test_worker_prompt_mentions_previous_failure() {
        let mut task = Task::new("Implement server");
        task.retries = 1;
        task.error = "Agent timed out after 900s".into();
        task.summary = "router half done".into();
        let settings = WorkerSettings {
            project_context: "A Go service".into(),
            ..WorkerSettings::default()
        };
        let prompt = worker_prompt(&task, &settings);
        assert!(prompt.starts_with("Project: A Go service"));
        assert!(prompt.contains("15-minute timeout"));
        assert!(prompt.contains("Task: Implement server"));
        assert!(prompt.contains("router half done"));
        assert!(prompt.contains("<status>done</status>"));
    }

    #[test]
    fn test_worker_prompt_offers_skills() {
        let task = Task::new("Write release notes");
        let settings = WorkerSettings {
            skills: "Available skills and patterns:\n\n### /changelog\nKeep a changelog\n".into(),
            ..WorkerSettings::default()
        };
        let prompt = worker_prompt(&task, &settings);
        assert!(prompt.starts_with("Available skills and patterns:"));
        assert!(prompt.contains("Use the relevant skills above"));
        assert!(!worker_prompt(&task, &WorkerSettings::default()).contains("skills"));
    }

    #[test]
    fn test_first_line_summary() {
        assert_eq!(first_line_summary("\n\n  built it  \nmore"), "built it");
        assert_eq!(first_line_summary(""), "");
    }

    #[test]
    fn test_summarize_prompt_includes_partial() {
        assert!(summarize_prompt("wrote main.go").contains("wrote main.go"));
        assert!(!summarize_prompt("").contains("partial output"));
    }
}
