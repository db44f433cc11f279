//! Worker pool behavior against a real store and queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use flotilla::domain::models::{CancellationSource, Task, TaskStatus, WorkerAssignment};
use flotilla::services::task_queue::TaskQueue;
use flotilla::services::worker_pool::{TaskEvent, WorkerContext, WorkerPool};
use tokio::sync::mpsc;
use uuid::Uuid;

use common::{fast_worker_settings, seeded_store, FakeRunner};

/// Collect events until `count` tasks have completed.
async fn completions(
    rx: &mut mpsc::UnboundedReceiver<TaskEvent>,
    count: usize,
) -> Vec<(Uuid, String)> {
    let mut started = Vec::new();
    let mut done = 0;
    while done < count {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for workers")
            .expect("event channel closed");
        match event {
            TaskEvent::Started { task_id, worker } => started.push((task_id, worker)),
            TaskEvent::Completed { .. } => done += 1,
            TaskEvent::Failed { task_id } => panic!("task {task_id} failed"),
            TaskEvent::Progress { .. } => {}
        }
    }
    started
}

#[tokio::test]
async fn test_pinned_task_runs_on_its_worker() {
    let pinned: Vec<Task> = (0..4)
        .map(|i| {
            Task::new(format!("pinned {i}")).with_worker(WorkerAssignment::Pinned("w1".into()))
        })
        .collect();
    let (_dir, store) = seeded_store(pinned).await;
    let queue = Arc::new(TaskQueue::new());
    queue.extend(store.pending_ids().await).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationSource::new();
    let pool = WorkerPool::spawn(
        3,
        WorkerContext {
            store: Arc::clone(&store),
            queue,
            runner: FakeRunner::succeeding(),
            events: tx,
            settings: fast_worker_settings(),
        },
        &cancel.signal(),
    );
    assert_eq!(pool.worker_ids(), &["w0", "w1", "w2"]);

    let started = completions(&mut rx, 4).await;
    cancel.cancel();
    pool.join().await;

    assert!(started.iter().all(|(_, worker)| worker == "w1"));
}

#[tokio::test]
async fn test_pin_to_missing_worker_runs_anywhere() {
    let orphan = Task::new("orphan").with_worker(WorkerAssignment::from("w9".to_string()));
    let (_dir, store) = seeded_store(vec![orphan]).await;
    let queue = Arc::new(TaskQueue::new());
    queue.extend(store.pending_ids().await).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationSource::new();
    let pool = WorkerPool::spawn(
        1,
        WorkerContext {
            store: Arc::clone(&store),
            queue,
            runner: FakeRunner::succeeding(),
            events: tx,
            settings: fast_worker_settings(),
        },
        &cancel.signal(),
    );

    let started = completions(&mut rx, 1).await;
    cancel.cancel();
    pool.join().await;
    assert_eq!(started[0].1, "w0");
}

#[tokio::test]
async fn test_dependent_waits_for_dependency() {
    let base = Task::new("base");
    // enqueued first, but blocked until `base` completes
    let dependent = Task::new("dependent").with_dependency(base.id);
    let ids = (base.id, dependent.id);
    let (_dir, store) = seeded_store(vec![dependent, base]).await;
    let queue = Arc::new(TaskQueue::new());
    queue.extend(store.pending_ids().await).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationSource::new();
    let pool = WorkerPool::spawn(
        2,
        WorkerContext {
            store: Arc::clone(&store),
            queue,
            runner: FakeRunner::succeeding(),
            events: tx,
            settings: fast_worker_settings(),
        },
        &cancel.signal(),
    );

    let started = completions(&mut rx, 2).await;
    cancel.cancel();
    pool.join().await;

    let order: Vec<Uuid> = started.iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![ids.0, ids.1]);
    let dependent = store.task(ids.1).await.unwrap();
    assert_eq!(dependent.status, TaskStatus::Completed);
    assert!(dependent.started_at >= store.task(ids.0).await.unwrap().completed_at);
}
