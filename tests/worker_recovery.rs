//! How a worker salvages a task report from imperfect agent runs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use flotilla::domain::errors::AgentError;
use flotilla::domain::models::{AgentOutput, CancellationSource, Task, TaskStatus};
use flotilla::services::task_queue::TaskQueue;
use flotilla::services::worker_pool::{TaskEvent, WorkerContext, WorkerPool};

use common::{fast_worker_settings, seeded_store, ScriptedRunner};

/// Run `task` through a single worker and return it as stored afterwards.
async fn run_task(task: Task, runner: Arc<ScriptedRunner>) -> (TempDir, Task, TaskEvent) {
    let id = task.id;
    let (dir, store) = seeded_store(vec![task]).await;
    let queue = Arc::new(TaskQueue::new());
    queue.enqueue(id).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let cancel = CancellationSource::new();
    let pool = WorkerPool::spawn(
        1,
        WorkerContext {
            store: Arc::clone(&store),
            queue,
            runner,
            events: events_tx,
            settings: fast_worker_settings(),
        },
        &cancel.signal(),
    );

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events_rx.recv().await {
                Some(event @ (TaskEvent::Completed { .. } | TaskEvent::Failed { .. })) => {
                    break event
                }
                Some(_) => continue,
                None => panic!("workers stopped without an outcome"),
            }
        }
    })
    .await
    .expect("worker should report an outcome");

    cancel.cancel();
    pool.join().await;
    let stored = store.task(id).await.unwrap();
    (dir, stored, event)
}

#[tokio::test]
async fn test_unstructured_output_is_reformatted() {
    let runner = ScriptedRunner::new(
        Ok(AgentOutput::new("I added /health and a test for it.", "s-1")),
        vec![Ok("<summary>health endpoint added</summary>\n<status>done</status>".into())],
    );
    let (_dir, task, event) = run_task(Task::new("Add health endpoint"), runner.clone()).await;

    assert!(matches!(event, TaskEvent::Completed { .. }));
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.summary, "health endpoint added");
    assert_eq!(task.result, "I added /health and a test for it.");
    assert_eq!(task.session_id, "s-1");

    let resumes = runner.resume_prompts();
    assert_eq!(resumes.len(), 1);
    assert_eq!(resumes[0].0, "s-1");
    assert!(resumes[0].1.contains("<status>done</status>"));
}

#[tokio::test]
async fn test_failed_reformat_completes_on_raw_text() {
    let runner = ScriptedRunner::new(
        Ok(AgentOutput::new("Added the endpoint.\nAll tests pass.", "s-1")),
        vec![Err(AgentError::Timeout {
            secs: 60,
            partial: String::new(),
            session_id: "s-1".into(),
        })],
    );
    let (_dir, task, event) = run_task(Task::new("Add health endpoint"), runner.clone()).await;

    assert!(matches!(event, TaskEvent::Completed { .. }));
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, "Added the endpoint.\nAll tests pass.");
    assert_eq!(task.summary, "Added the endpoint.");
    assert!(task.error.is_empty());
    assert_eq!(runner.resume_prompts().len(), 1);
}

#[tokio::test]
async fn test_error_with_session_uses_resumed_summary() {
    let summary = "Completed: handler\nRemaining: tests\n<status>partial</status>\n\
                   <followups>\n<task>Write handler tests</task>\n</followups>";
    let runner = ScriptedRunner::new(
        Err(AgentError::Timeout {
            secs: 900,
            partial: "wrote handler.go".into(),
            session_id: "s-2".into(),
        }),
        vec![Ok(summary.into())],
    );
    let (_dir, task, event) = run_task(Task::new("Add handler"), runner.clone()).await;

    assert!(matches!(event, TaskEvent::Failed { .. }));
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result, summary);
    assert_eq!(task.summary, "Completed: handler");
    assert_eq!(task.followups, vec!["Write handler tests".to_string()]);
    assert_eq!(task.error, "Agent timed out after 900s");
    assert_eq!(task.session_id, "s-2");

    let resumes = runner.resume_prompts();
    assert_eq!(resumes.len(), 1);
    assert_eq!(resumes[0].0, "s-2");
    assert!(resumes[0].1.contains("wrote handler.go"));
}

#[tokio::test]
async fn test_error_without_session_keeps_partial_output() {
    let runner = ScriptedRunner::new(
        Err(AgentError::Exit {
            code: 1,
            message: "tests failed".into(),
            partial: "compiled half the crate".into(),
            session_id: String::new(),
        }),
        vec![],
    );
    let (_dir, task, event) = run_task(Task::new("Fix build"), runner.clone()).await;

    assert!(matches!(event, TaskEvent::Failed { .. }));
    assert_eq!(task.result, "compiled half the crate");
    assert_eq!(task.summary, "compiled half the crate");
    assert_eq!(task.error, "Agent exited with code 1: tests failed");
    assert!(runner.resume_prompts().is_empty());
}

#[tokio::test]
async fn test_partial_status_fails_with_followups() {
    let output = "<summary>router only</summary>\n<status>partial</status>\n\
                  <followups>\n<task>Add middleware</task>\n<task>Add auth</task>\n</followups>";
    let runner = ScriptedRunner::new(Ok(AgentOutput::new(output, "s-3")), vec![]);
    let (_dir, task, event) = run_task(Task::new("Build router"), runner.clone()).await;

    assert!(matches!(event, TaskEvent::Failed { .. }));
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error, "worker reported partial");
    assert_eq!(task.summary, "router only");
    assert_eq!(
        task.followups,
        vec!["Add middleware".to_string(), "Add auth".to_string()]
    );
    assert!(runner.resume_prompts().is_empty(), "structured output needs no reformat");
}

#[tokio::test]
async fn test_max_turns_output_fails() {
    let runner = ScriptedRunner::new(
        Ok(AgentOutput::new("Error: Reached max turns (5)", "s-4")),
        vec![],
    );
    let (_dir, task, event) = run_task(Task::new("Refactor storage"), runner).await;

    assert!(matches!(event, TaskEvent::Failed { .. }));
    assert_eq!(task.error, "reached max turns");
    assert_eq!(task.session_id, "s-4");
}

#[tokio::test]
async fn test_retry_continues_previous_session() {
    let mut task = Task::new("Add handler");
    task.session_id = "s-9".into();
    task.retries = 1;
    task.error = "Agent timed out after 900s".into();
    let runner = ScriptedRunner::new(
        Ok(AgentOutput::new("<summary>handler done</summary>\n<status>done</status>", "s-9")),
        vec![],
    );
    let (_dir, task, _) = run_task(task, runner.clone()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(runner.resumed_sessions(), vec![Some("s-9".to_string())]);
}
