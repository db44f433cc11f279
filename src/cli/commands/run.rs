//! `flotilla run`: plan (or continue) and drive a run to completion.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::application::{
    install_interrupt_handler, Collaborators, RunManager, RunOptions, RunOutcome, RunReport,
};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{CancellationSource, Config};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::services::state_store::StatusCounts;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Design file(s), a directory of markdown files, or inline goal text
    pub design: Vec<String>,

    /// Wipe existing state and start over
    #[arg(short, long)]
    pub fresh: bool,

    /// Number of concurrent workers (overrides config and planner hint)
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,

    /// Per-task timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Agent turn budget per task attempt
    #[arg(short, long)]
    pub max_turns: Option<u32>,

    /// Skip design validation
    #[arg(short, long)]
    pub skip_validation: bool,

    /// Validate the design and exit
    #[arg(short = 'k', long = "check")]
    pub check: bool,

    /// Enable the refiner stage of the critique pipeline
    #[arg(short = 'x', long)]
    pub refiner: bool,

    /// Log to stderr (-vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl RunArgs {
    /// Fold command-line overrides into the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(secs) = self.timeout {
            config.task_timeout_secs = secs;
        }
        if let Some(turns) = self.max_turns {
            config.max_turns = turns;
        }
        if self.refiner {
            config.critique.refiner_enabled = true;
        }
        if self.verbose > 0 {
            config.logging.console = true;
        }
        if self.verbose > 1 {
            config.logging.level = "debug".to_string();
        }
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            design_args: self.design.clone(),
            fresh: self.fresh,
            workers: self.workers,
            skip_validation: self.skip_validation,
            check_only: self.check,
        }
    }
}

pub async fn execute(args: RunArgs, json_mode: bool) -> Result<i32> {
    let mut config = ConfigLoader::load()?;
    args.apply(&mut config);
    ConfigLoader::validate(&config)?;

    let data_dir = Path::new(&config.data_dir).to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("cannot create {}", data_dir.display()))?;
    let logger = LoggerImpl::init(&LogConfig::from_settings(&config.logging, &data_dir))?;

    let interrupt = CancellationSource::new();
    let signal = interrupt.signal();
    install_interrupt_handler(interrupt)?;

    let collaborators = Collaborators::from_config(&config, &signal);
    let manager = RunManager::new(config, ".", collaborators);
    let outcome = manager.run(args.options(), signal).await?;

    let code = outcome.exit_code();
    output(&RunOutput::from(outcome), json_mode);
    drop(logger);
    Ok(code)
}

/// Printable form of a [`RunOutcome`].
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutput {
    Finished(RunReport),
    Interrupted(RunReport),
    AlreadyComplete { counts: StatusCounts },
    Rejected { path: PathBuf, gaps: Vec<String> },
    Checked,
}

impl From<RunOutcome> for RunOutput {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Finished(report) => Self::Finished(report),
            RunOutcome::Interrupted(report) => Self::Interrupted(report),
            RunOutcome::AlreadyComplete(counts) => Self::AlreadyComplete { counts },
            RunOutcome::Rejected { path, gaps } => Self::Rejected { path, gaps },
            RunOutcome::Checked => Self::Checked,
        }
    }
}

fn counts_line(counts: &StatusCounts) -> String {
    format!(
        "{}/{} completed, {} failed, {} cascade-failed, {} pending",
        counts.completed,
        counts.total(),
        counts.failed,
        counts.cascade_failed,
        counts.pending + counts.running,
    )
}

fn report_lines(heading: &str, report: &RunReport) -> String {
    let mut lines = vec![
        heading.to_string(),
        format!("  {}", counts_line(&report.counts)),
        format!(
            "  {} workers, {} critique passes",
            report.workers, report.critique_passes
        ),
    ];
    if !report.failures.is_empty() {
        lines.push(TableFormatter::new().format_failures(&report.failures));
    }
    lines.join("\n")
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        match self {
            Self::Finished(report) => report_lines("Run finished.", report),
            Self::Interrupted(report) => report_lines(
                "Run interrupted; run again to continue where it stopped.",
                report,
            ),
            Self::AlreadyComplete { counts } => format!(
                "Work already complete ({}). Use --fresh to start over.",
                counts_line(counts)
            ),
            Self::Rejected { path, gaps } => {
                let mut lines = vec![format!(
                    "Design rejected; details written to {}",
                    path.display()
                )];
                lines.extend(gaps.iter().map(|gap| format!("  - {gap}")));
                lines.join("\n")
            }
            Self::Checked => "Design check passed.".to_string(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
