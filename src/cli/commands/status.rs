//! `flotilla status`: read-only view of persisted state.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Task, TaskStatus, WorkState};
use crate::infrastructure::config::ConfigLoader;
use crate::services::state_store::{StateStore, StatusCounts};

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Only show tasks with this status
    #[arg(short, long, value_parser = parse_status)]
    pub status: Option<TaskStatus>,
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::from_str(s).ok_or_else(|| {
        format!("unknown status '{s}' (pending, running, completed, failed, cascade_failed)")
    })
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub work: Option<WorkState>,
    pub counts: StatusCounts,
    pub tasks: Vec<Task>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let Some(work) = &self.work else {
            return "No run found in this directory.".to_string();
        };
        let state = if work.is_complete {
            "complete"
        } else {
            "in progress"
        };
        let mut lines = vec![
            format!("Design:  {}", work.design_file),
            format!("Mode:    {}", work.execution_mode),
            format!("State:   {state}"),
            format!(
                "Tasks:   {}/{} completed, {} failed, {} cascade-failed",
                self.counts.completed,
                self.counts.total(),
                self.counts.failed,
                self.counts.cascade_failed
            ),
        ];
        if !self.tasks.is_empty() {
            lines.push(TableFormatter::new().format_tasks(&self.tasks));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: StatusArgs, json_mode: bool) -> Result<i32> {
    let config = ConfigLoader::load()?;
    let store = StateStore::open_read_only(&config.data_dir)
        .await
        .with_context(|| format!("cannot read state in {}", config.data_dir))?;
    let snapshot = store.snapshot().await;

    let counts = snapshot.counts();
    let tasks = snapshot
        .tasks
        .into_iter()
        .filter(|task| args.status.map_or(true, |status| task.status == status))
        .collect();
    output(
        &StatusOutput {
            work: snapshot.work,
            counts,
            tasks,
        },
        json_mode,
    );
    Ok(0)
}
