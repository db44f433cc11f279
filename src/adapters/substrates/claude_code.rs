//! Claude Code CLI agent runner.
//!
//! Spawns `claude -p` processes in stream-json mode, relays `<progress>`
//! markers from assistant text while the agent works, and turns the final
//! `result` event into an [`AgentOutput`] or a typed [`AgentError`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::select;
use tracing::{debug, instrument, warn};

use crate::domain::errors::AgentError;
use crate::domain::models::{AgentOutput, AgentRequest, CancelSignal, Config};
use crate::domain::ports::AgentRunner;
use crate::services::output_parser::progress_markers;

use super::process::ProcessGuard;

/// Claude Code CLI runner configuration.
#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    /// Path to claude CLI binary
    pub binary_path: String,
    /// Model to use
    pub model: String,
    /// Permission mode passed through to the CLI
    pub permission_mode: String,
    /// Tools allowed without prompting; empty means the built-in set
    pub allowed_tools: Vec<String>,
    /// Working directory for agent processes
    pub working_dir: PathBuf,
    /// Grace period between SIGTERM and SIGKILL
    pub shutdown_grace: Duration,
}

const DEFAULT_ALLOWED_TOOLS: &[&str] = &[
    "Read", "Edit", "Write", "Bash", "Glob", "Grep", "TodoWrite", "MultiEdit",
];

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
            model: "sonnet".to_string(),
            permission_mode: "bypassPermissions".to_string(),
            allowed_tools: vec![],
            working_dir: PathBuf::from("."),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ClaudeCodeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary_path: config.agent.binary.clone(),
            model: config.agent.model.clone(),
            permission_mode: config.agent.permission_mode.clone(),
            allowed_tools: config.agent.allowed_tools.clone(),
            working_dir: PathBuf::from(&config.agent.working_dir),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

/// One parsed line of stream-json output.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamEvent {
    /// Text blocks of an assistant message
    AssistantText(String),
    /// Final event of the session
    Result {
        result: String,
        session_id: String,
        subtype: String,
    },
}

/// What the stdout stream amounted to before the process exited.
#[derive(Debug, Default)]
struct StreamState {
    result: String,
    session_id: String,
    subtype: String,
}

enum StreamEnd {
    Finished(std::io::Result<()>),
    TimedOut,
    Cancelled,
}

/// Claude Code CLI runner.
#[derive(Debug, Clone)]
pub struct ClaudeCodeRunner {
    config: ClaudeCodeConfig,
}

impl ClaudeCodeRunner {
    pub fn new(config: ClaudeCodeConfig) -> Self {
        Self { config }
    }

    /// Build CLI arguments for a run, continuing `resume_session` when set.
    fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(session_id) = &request.resume_session {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        args.extend([
            "-p".to_string(),
            request.prompt.clone(),
            "--model".to_string(),
            self.config.model.clone(),
            "--permission-mode".to_string(),
            self.config.permission_mode.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]);

        if let Some(max_turns) = request.max_turns {
            args.push("--max-turns".to_string());
            args.push(max_turns.to_string());
        }

        let tools = if self.config.allowed_tools.is_empty() {
            DEFAULT_ALLOWED_TOOLS.join(" ")
        } else {
            self.config.allowed_tools.join(" ")
        };
        args.push("--allowedTools".to_string());
        args.push(tools);

        args
    }

    /// Build CLI arguments to continue an existing session.
    fn build_resume_args(&self, session_id: &str, prompt: &str) -> Vec<String> {
        vec![
            "--resume".to_string(),
            session_id.to_string(),
            "-p".to_string(),
            prompt.to_string(),
            "--model".to_string(),
            self.config.model.clone(),
            "--permission-mode".to_string(),
            self.config.permission_mode.clone(),
            "--output-format".to_string(),
            "json".to_string(),
        ]
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null());
        cmd
    }

    /// Parse one line of stream-json output.
    fn parse_stream_line(line: &str) -> Option<StreamEvent> {
        let json: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
        match json.get("type").and_then(|t| t.as_str())? {
            "assistant" => {
                let blocks = json
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_array())?;
                let text: Vec<&str> = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect();
                if text.is_empty() {
                    None
                } else {
                    Some(StreamEvent::AssistantText(text.join("\n")))
                }
            }
            "result" => {
                let field = |name: &str| {
                    json.get(name)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                Some(StreamEvent::Result {
                    result: field("result"),
                    session_id: field("session_id"),
                    subtype: field("subtype"),
                })
            }
            _ => None,
        }
    }

    /// Pull `result` out of `--output-format json`, else return the raw text.
    fn parse_json_result(raw: &str) -> String {
        let trimmed = raw.trim();
        serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .and_then(|v| v.get("result").and_then(|r| r.as_str()).map(str::to_string))
            .unwrap_or_else(|| trimmed.to_string())
    }
}

async fn cancelled(cancel: Option<&CancelSignal>) {
    match cancel {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl AgentRunner for ClaudeCodeRunner {
    fn name(&self) -> &'static str {
        "claude_code"
    }

    #[instrument(skip_all, fields(model = %self.config.model, timeout_secs = request.timeout.as_secs()))]
    async fn execute(&self, request: AgentRequest) -> Result<AgentOutput, AgentError> {
        let args = self.build_args(&request);
        let mut cmd = self.command(&args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut guard = ProcessGuard::spawn(&mut cmd, self.config.shutdown_grace)?;

        let stdout = guard
            .child_mut()
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("failed to capture stdout".to_string()))?;
        let mut stderr = guard
            .child_mut()
            .stderr
            .take()
            .ok_or_else(|| AgentError::Spawn("failed to capture stderr".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut state = StreamState::default();
        let progress = request.progress.clone();
        let end = {
            let stream = async {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(line) = lines.next_line().await? {
                    match Self::parse_stream_line(&line) {
                        Some(StreamEvent::AssistantText(text)) => {
                            if let Some(tx) = &progress {
                                for marker in progress_markers(&text) {
                                    let _ = tx.send(marker);
                                }
                            }
                        }
                        Some(StreamEvent::Result {
                            result,
                            session_id,
                            subtype,
                        }) => {
                            state.result = result;
                            state.session_id = session_id;
                            state.subtype = subtype;
                        }
                        None => {}
                    }
                }
                Ok::<(), std::io::Error>(())
            };
            select! {
                r = tokio::time::timeout(request.timeout, stream) => match r {
                    Ok(finished) => StreamEnd::Finished(finished),
                    Err(_) => StreamEnd::TimedOut,
                },
                () = cancelled(request.cancel.as_ref()) => StreamEnd::Cancelled,
            }
        };

        match end {
            StreamEnd::TimedOut => {
                guard.terminate().await;
                stderr_task.abort();
                return Err(AgentError::Timeout {
                    secs: request.timeout.as_secs(),
                    partial: state.result,
                    session_id: state.session_id,
                });
            }
            StreamEnd::Cancelled => {
                guard.terminate().await;
                stderr_task.abort();
                return Err(AgentError::Cancelled);
            }
            StreamEnd::Finished(Err(e)) => {
                warn!(error = %e, "error reading agent output");
            }
            StreamEnd::Finished(Ok(())) => {}
        }

        let status = match guard.wait().await {
            Ok(status) => status,
            Err(e) => {
                guard.terminate().await;
                return Err(AgentError::Exit {
                    code: -1,
                    message: e.to_string(),
                    partial: state.result,
                    session_id: state.session_id,
                });
            }
        };
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let message = [stderr_text.trim(), state.result.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .map_or_else(|| format!("exit {code}"), str::to_string);
            return Err(AgentError::Exit {
                code,
                message,
                partial: state.result,
                session_id: state.session_id,
            });
        }
        if state.result.is_empty() {
            return Err(AgentError::EmptyOutput {
                session_id: state.session_id,
            });
        }
        if state.subtype == "error_max_turns" {
            return Err(AgentError::MaxTurns {
                partial: state.result,
                session_id: state.session_id,
            });
        }

        debug!(chars = state.result.len(), "agent finished");
        Ok(AgentOutput::new(state.result, state.session_id))
    }

    async fn resume(
        &self,
        session_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, AgentError> {
        let args = self.build_resume_args(session_id, prompt);
        let mut cmd = self.command(&args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        let mut guard = ProcessGuard::spawn(&mut cmd, self.config.shutdown_grace)?;

        let mut stdout = guard
            .child_mut()
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("failed to capture stdout".to_string()))?;
        let mut raw = String::new();
        let read = tokio::time::timeout(timeout, stdout.read_to_string(&mut raw)).await;
        if read.is_err() {
            guard.terminate().await;
            return Err(AgentError::Timeout {
                secs: timeout.as_secs(),
                partial: raw,
                session_id: session_id.to_string(),
            });
        }

        let status = guard.wait().await.map_err(|e| AgentError::Exit {
            code: -1,
            message: e.to_string(),
            partial: String::new(),
            session_id: session_id.to_string(),
        })?;
        if !status.success() {
            return Err(AgentError::Exit {
                code: status.code().unwrap_or(-1),
                message: "resume failed".to_string(),
                partial: raw,
                session_id: session_id.to_string(),
            });
        }
        Ok(Self::parse_json_result(&raw))
    }
}
