use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for Flotilla
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Configured number of concurrent workers (1-64)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Project-local state directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Hard ceiling for one task attempt, in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Agent turn budget per task attempt
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Judge poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Failures allowed before a task is exhausted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a worker re-enqueues a dependency-blocked task
    #[serde(default = "default_dependency_backoff_ms")]
    pub dependency_backoff_ms: u64,

    /// Grace period between SIGTERM and SIGKILL for agent processes
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Critique pipeline configuration
    #[serde(default)]
    pub critique: CritiqueConfig,

    /// Adversarial verifier configuration
    #[serde(default)]
    pub adversarial: AdversarialConfig,

    /// Agent CLI configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_workers() -> usize {
    4
}

fn default_data_dir() -> String {
    ".flotilla".to_string()
}

const fn default_task_timeout_secs() -> u64 {
    900
}

const fn default_max_turns() -> u32 {
    25
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_max_retries() -> u32 {
    10
}

const fn default_dependency_backoff_ms() -> u64 {
    1000
}

const fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            data_dir: default_data_dir(),
            task_timeout_secs: default_task_timeout_secs(),
            max_turns: default_max_turns(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            dependency_backoff_ms: default_dependency_backoff_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            critique: CritiqueConfig::default(),
            adversarial: AdversarialConfig::default(),
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Refiner / replanner / narrow-judge limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CritiqueConfig {
    /// Medium-cost refiner is opt-in
    #[serde(default)]
    pub refiner_enabled: bool,

    #[serde(default = "default_max_refine_rounds")]
    pub max_refine_rounds: u32,

    #[serde(default = "default_max_replan_rounds")]
    pub max_replan_rounds: u32,

    /// Consecutive inconclusive calls before a stage is treated as silent
    #[serde(default = "default_max_inconclusive_attempts")]
    pub max_inconclusive_attempts: u32,

    #[serde(default = "default_judge_timeout_secs")]
    pub judge_timeout_secs: u64,

    #[serde(default = "default_refine_timeout_secs")]
    pub refine_timeout_secs: u64,

    #[serde(default = "default_replan_timeout_secs")]
    pub replan_timeout_secs: u64,
}

const fn default_max_refine_rounds() -> u32 {
    10
}

const fn default_max_replan_rounds() -> u32 {
    1
}

const fn default_max_inconclusive_attempts() -> u32 {
    3
}

const fn default_judge_timeout_secs() -> u64 {
    45
}

const fn default_refine_timeout_secs() -> u64 {
    60
}

const fn default_replan_timeout_secs() -> u64 {
    90
}

impl Default for CritiqueConfig {
    fn default() -> Self {
        Self {
            refiner_enabled: false,
            max_refine_rounds: default_max_refine_rounds(),
            max_replan_rounds: default_max_replan_rounds(),
            max_inconclusive_attempts: default_max_inconclusive_attempts(),
            judge_timeout_secs: default_judge_timeout_secs(),
            refine_timeout_secs: default_refine_timeout_secs(),
            replan_timeout_secs: default_replan_timeout_secs(),
        }
    }
}

/// Adversarial verifier limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdversarialConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rounds that may enqueue challenge tasks
    #[serde(default = "default_adversarial_rounds")]
    pub rounds: u32,

    /// Generation calls per round before the verifier gives up
    #[serde(default = "default_attempts_per_round")]
    pub attempts_per_round: u32,

    /// Challenges requested per generation call
    #[serde(default = "default_candidates")]
    pub candidates: usize,

    /// Challenges enqueued per round
    #[serde(default = "default_sample")]
    pub sample: usize,

    #[serde(default = "default_adversarial_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_adversarial_rounds() -> u32 {
    3
}

const fn default_attempts_per_round() -> u32 {
    3
}

const fn default_candidates() -> usize {
    10
}

const fn default_sample() -> usize {
    2
}

const fn default_adversarial_timeout_secs() -> u64 {
    120
}

impl Default for AdversarialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rounds: default_adversarial_rounds(),
            attempts_per_round: default_attempts_per_round(),
            candidates: default_candidates(),
            sample: default_sample(),
            timeout_secs: default_adversarial_timeout_secs(),
        }
    }
}

/// Agent CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Path to claude CLI binary
    #[serde(default = "default_binary")]
    pub binary: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,

    /// Tools the agent may use without prompting; empty means CLI default
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    /// Path to codex CLI binary (refiner backend)
    #[serde(default = "default_codex_binary")]
    pub codex_binary: String,

    /// Working directory for agent processes
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Skill definitions offered to workers; `None` means `~/.claude/skills`
    #[serde(default)]
    pub skills_dir: Option<PathBuf>,
}

fn default_binary() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_permission_mode() -> String {
    "bypassPermissions".to_string()
}

fn default_codex_binary() -> String {
    "codex".to_string()
}

fn default_working_dir() -> String {
    ".".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            model: default_model(),
            permission_mode: default_permission_mode(),
            allowed_tools: vec![],
            codex_binary: default_codex_binary(),
            working_dir: default_working_dir(),
            skills_dir: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Write rolling json logs under `<data_dir>/log`
    #[serde(default = "default_true")]
    pub file_output: bool,

    /// Mirror logs to stderr
    #[serde(default)]
    pub console: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file_output: true,
            console: false,
        }
    }
}
