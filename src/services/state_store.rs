//! Durable state store.
//!
//! Owns every task record and the single work record of a project-local run.
//! All changes go through [`StateStore::mutate`], which serializes callers,
//! applies the change to a copy of the snapshot, persists the copy with a
//! write-temp-then-rename, and only then commits it in memory. Readers always
//! receive clones.
//!
//! On disk the state is two pretty-printed JSON files under the data
//! directory: `tasks.json` (an object keyed by task id, in insertion order)
//! and `work.json`.

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::de::{MapAccess, Visitor};
use serde::{Deserializer, Serialize, Serializer};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, StoreError, StoreResult};
use crate::domain::models::{Task, TaskStatus, WorkState};
use crate::services::dependency_resolver::DependencyResolver;

const TASKS_FILE: &str = "tasks.json";
const WORK_FILE: &str = "work.json";
const LOCK_FILE: &str = "flotilla.lock";
const LOG_DIR: &str = "log";

/// In-memory image of the durable state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    /// Tasks in insertion order
    pub tasks: Vec<Task>,
    pub work: Option<WorkState>,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cascade_failed: usize,
}

impl StatusCounts {
    pub fn tally(tasks: &[Task]) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::CascadeFailed => counts.cascade_failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cascade_failed
    }
}

impl StateSnapshot {
    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: Uuid) -> DomainResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(DomainError::TaskNotFound(id))
    }

    pub fn work_mut(&mut self) -> DomainResult<&mut WorkState> {
        self.work.as_mut().ok_or(DomainError::MissingWorkState)
    }

    /// No task is pending or running, and at least one task exists.
    pub fn is_settled(&self) -> bool {
        !self.tasks.is_empty() && !self.tasks.iter().any(|t| t.status.is_active())
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.tasks)
    }

    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id)
            .collect()
    }
}

/// What a worker learned from one attempt, written back onto the task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub result: String,
    pub summary: String,
    pub session_id: String,
    pub followups: Vec<String>,
    pub error: String,
}

/// Judge decision on a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending; `attempt` is the failure count so far
    Retried { attempt: u32 },
    /// Retries exhausted: the task and `cascaded` dependents are cascade-failed
    Exhausted { cascaded: Vec<Uuid> },
    /// The task was no longer failed (already handled)
    Skipped,
}

/// Exclusive-access durable store for tasks and the work record.
pub struct StateStore {
    dir: PathBuf,
    state: Mutex<StateSnapshot>,
    resolver: DependencyResolver,
    run_lock: Option<Flock<std::fs::File>>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("dir", &self.dir)
            .field("locked", &self.run_lock.is_some())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open the store for a run, taking the run lock on the data directory.
    ///
    /// Fails with [`StoreError::Locked`] if another process holds it.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        let lock = acquire_run_lock(&dir)?;
        let snapshot = load_snapshot(&dir).await?;
        info!(
            dir = %dir.display(),
            tasks = snapshot.tasks.len(),
            has_work = snapshot.work.is_some(),
            "state store opened"
        );
        Ok(Self {
            dir,
            state: Mutex::new(snapshot),
            resolver: DependencyResolver::new(),
            run_lock: Some(lock),
        })
    }

    /// Open without the run lock, for read-only inspection.
    pub async fn open_read_only(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let snapshot = load_snapshot(&dir).await?;
        Ok(Self {
            dir,
            state: Mutex::new(snapshot),
            resolver: DependencyResolver::new(),
            run_lock: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomic read-modify-write.
    ///
    /// `f` runs against a copy of the snapshot. The copy is persisted and then
    /// committed; if `f` fails or the write fails, nothing changes.
    pub async fn mutate<R, F>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut StateSnapshot) -> DomainResult<R>,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    /// Persist the current snapshot unchanged.
    pub async fn save(&self) -> StoreResult<()> {
        let guard = self.state.lock().await;
        self.persist(&guard).await
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        self.state.lock().await.clone()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.state.lock().await.tasks.clone()
    }

    pub async fn task(&self, id: Uuid) -> Option<Task> {
        self.state.lock().await.task(id).cloned()
    }

    pub async fn work(&self) -> Option<WorkState> {
        self.state.lock().await.work.clone()
    }

    pub async fn pending_ids(&self) -> Vec<Uuid> {
        self.state
            .lock()
            .await
            .ids_with_status(TaskStatus::Pending)
    }

    pub async fn is_settled(&self) -> bool {
        self.state.lock().await.is_settled()
    }

    /// Whether every dependency of task `id` is completed.
    pub async fn dependencies_met(&self, id: Uuid) -> DomainResult<bool> {
        let state = self.state.lock().await;
        let task = state.task(id).ok_or(DomainError::TaskNotFound(id))?;
        Ok(self.resolver.is_eligible(task, &state.tasks))
    }

    /// Drop all tasks and replace the work record.
    #[instrument(skip(self, work), fields(design = %work.design_file))]
    pub async fn init_work(&self, work: WorkState) -> StoreResult<()> {
        self.mutate(|state| {
            state.tasks.clear();
            state.work = Some(work);
            Ok(())
        })
        .await
    }

    /// Forget everything, leaving an empty store.
    ///
    /// Every artifact of the earlier run in the data directory goes too (the
    /// rejection and project notes, the validation marker). The run lock and
    /// the log directory stay, since this process is using both.
    pub async fn clear(&self) -> StoreResult<()> {
        self.mutate(|state| {
            *state = StateSnapshot::default();
            Ok(())
        })
        .await?;

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            if name == LOCK_FILE || name == LOG_DIR {
                continue;
            }
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| StoreError::io(&path, e))?
                .is_dir();
            let removed = if is_dir {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match removed {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Append new tasks. The batch is validated and the resulting graph must
    /// stay acyclic.
    pub async fn add_tasks(&self, tasks: Vec<Task>) -> StoreResult<Vec<Uuid>> {
        let resolver = self.resolver.clone();
        self.mutate(move |state| {
            for task in &tasks {
                task.validate()?;
            }
            let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
            state.tasks.extend(tasks);
            resolver.ensure_acyclic(&state.tasks)?;
            if let Some(work) = state.work.as_mut() {
                work.touch();
            }
            Ok(ids)
        })
        .await
    }

    /// Transition a pending task to running and return a copy of it.
    pub async fn start_task(&self, id: Uuid) -> StoreResult<Task> {
        self.mutate(|state| {
            let task = state.task_mut(id)?;
            task.transition_to(TaskStatus::Running)?;
            task.error.clear();
            Ok(task.clone())
        })
        .await
    }

    pub async fn complete_task(&self, id: Uuid, report: TaskReport) -> StoreResult<()> {
        self.mutate(|state| {
            let task = state.task_mut(id)?;
            task.transition_to(TaskStatus::Completed)?;
            apply_report(task, report);
            Ok(())
        })
        .await
    }

    pub async fn fail_task(&self, id: Uuid, report: TaskReport) -> StoreResult<()> {
        self.mutate(|state| {
            let task = state.task_mut(id)?;
            task.transition_to(TaskStatus::Failed)?;
            apply_report(task, report);
            Ok(())
        })
        .await
    }

    /// Count one more failure against a failed task and either send it back
    /// to pending or exhaust it, cascading to every transitive dependent.
    pub async fn retry_or_exhaust(&self, id: Uuid, max_retries: u32) -> StoreResult<RetryDecision> {
        let resolver = self.resolver.clone();
        self.mutate(move |state| {
            let task = state.task_mut(id)?;
            if task.status != TaskStatus::Failed {
                return Ok(RetryDecision::Skipped);
            }
            task.retries += 1;
            if task.retries < max_retries {
                task.transition_to(TaskStatus::Pending)?;
                return Ok(RetryDecision::Retried {
                    attempt: task.retries,
                });
            }
            task.transition_to(TaskStatus::CascadeFailed)?;
            let cascaded = cascade(state, &resolver, id)?;
            Ok(RetryDecision::Exhausted { cascaded })
        })
        .await
    }

    /// Move every running task back to pending. Returns the reset ids.
    #[instrument(skip(self))]
    pub async fn reset_interrupted(&self) -> StoreResult<Vec<Uuid>> {
        let reset = self
            .mutate(|state| {
                let mut reset = Vec::new();
                for task in state
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == TaskStatus::Running)
                {
                    task.transition_to(TaskStatus::Pending)?;
                    reset.push(task.id);
                }
                Ok(reset)
            })
            .await?;
        if !reset.is_empty() {
            info!(count = reset.len(), "reset interrupted tasks to pending");
        }
        Ok(reset)
    }

    /// Set the completion flag. Returns `true` only the first time.
    pub async fn mark_complete(&self) -> StoreResult<bool> {
        self.mutate(|state| Ok(state.work_mut()?.mark_complete()))
            .await
    }

    async fn persist(&self, snapshot: &StateSnapshot) -> StoreResult<()> {
        let tasks = encode_tasks(&snapshot.tasks)?;
        write_atomic(&self.dir.join(TASKS_FILE), &tasks).await?;
        if let Some(work) = &snapshot.work {
            let work = encode_pretty(work)?;
            write_atomic(&self.dir.join(WORK_FILE), &work).await?;
        }
        debug!(tasks = snapshot.tasks.len(), "state persisted");
        Ok(())
    }
}

fn apply_report(task: &mut Task, report: TaskReport) {
    task.result = report.result;
    task.summary = report.summary;
    task.error = report.error;
    task.followups = report.followups;
    if !report.session_id.is_empty() {
        task.session_id = report.session_id;
    }
}

/// Cascade-fail every transitive dependent of `root` that can still run.
fn cascade(
    state: &mut StateSnapshot,
    resolver: &DependencyResolver,
    root: Uuid,
) -> DomainResult<Vec<Uuid>> {
    let root_label = state
        .task(root)
        .map(Task::short_id)
        .unwrap_or_else(|| root.to_string());
    let dependents = resolver.transitive_dependents(root, &state.tasks);
    let mut cascaded = Vec::new();
    for id in dependents {
        let task = state.task_mut(id)?;
        if !task.can_transition_to(TaskStatus::CascadeFailed) {
            if task.status != TaskStatus::CascadeFailed {
                warn!(task_id = %id, status = %task.status, "dependent of exhausted task not cascaded");
            }
            continue;
        }
        task.transition_to(TaskStatus::CascadeFailed)?;
        task.error = format!("dependency {root_label} failed");
        cascaded.push(id);
    }
    Ok(cascaded)
}

fn acquire_run_lock(dir: &Path) -> StoreResult<Flock<std::fs::File>> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(lock),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
            Err(StoreError::Locked(dir.to_path_buf()))
        }
        Err((_, errno)) => Err(StoreError::io(path, std::io::Error::from(errno))),
    }
}

async fn load_snapshot(dir: &Path) -> StoreResult<StateSnapshot> {
    let tasks = match read_optional(&dir.join(TASKS_FILE)).await? {
        Some(bytes) => decode_tasks(&bytes)?,
        None => Vec::new(),
    };
    let work = match read_optional(&dir.join(WORK_FILE)).await? {
        Some(bytes) => Some(serde_json::from_slice(&bytes)?),
        None => None,
    };
    Ok(StateSnapshot { tasks, work })
}

async fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

fn encode_pretty<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Serialize tasks as an object keyed by id, preserving insertion order.
fn encode_tasks(tasks: &[Task]) -> StoreResult<Vec<u8>> {
    struct Keyed<'a>(&'a [Task]);

    impl Serialize for Keyed<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_map(self.0.iter().map(|t| (t.id, t)))
        }
    }

    encode_pretty(&Keyed(tasks))
}

fn decode_tasks(bytes: &[u8]) -> StoreResult<Vec<Task>> {
    struct KeyedVisitor;

    impl<'de> Visitor<'de> for KeyedVisitor {
        type Value = Vec<Task>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object mapping task ids to tasks")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut tasks = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((_key, task)) = map.next_entry::<String, Task>()? {
                tasks.push(task);
            }
            Ok(tasks)
        }
    }

    let mut de = serde_json::Deserializer::from_slice(bytes);
    let tasks = (&mut de).deserialize_map(KeyedVisitor)?;
    de.end()?;
    Ok(tasks)
}
