//! Codex CLI agent runner.
//!
//! Runs `codex exec` non-interactively in a read-only sandbox. The prompt is
//! fed on stdin and the final message is written by the CLI to a scratch
//! file, which is preferred over stdout when present.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::select;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::AgentError;
use crate::domain::models::{AgentOutput, AgentRequest, CancelSignal, Config};
use crate::domain::ports::AgentRunner;

use super::process::ProcessGuard;

#[derive(Debug, Clone)]
pub struct CodexConfig {
    pub binary_path: String,
    /// Model override; `None` uses the CLI's own default
    pub model: Option<String>,
    pub sandbox: String,
    pub working_dir: PathBuf,
    pub shutdown_grace: Duration,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            binary_path: "codex".to_string(),
            model: None,
            sandbox: "read-only".to_string(),
            working_dir: PathBuf::from("."),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl CodexConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary_path: config.agent.codex_binary.clone(),
            working_dir: PathBuf::from(&config.agent.working_dir),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            ..Self::default()
        }
    }
}

enum RunEnd {
    Finished(std::io::Result<(std::process::ExitStatus, String, String)>),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CodexRunner {
    config: CodexConfig,
}

impl CodexRunner {
    pub fn new(config: CodexConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, output_file: &Path) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--output-last-message".to_string(),
            output_file.display().to_string(),
            "--sandbox".to_string(),
            self.config.sandbox.clone(),
        ];
        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }

    /// Prefer the last-message file, fall back to stdout.
    fn pick_output(file_contents: Option<String>, stdout: &str) -> String {
        file_contents
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| stdout.trim().to_string())
    }
}

async fn cancelled(cancel: Option<&CancelSignal>) {
    match cancel {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl AgentRunner for CodexRunner {
    fn name(&self) -> &'static str {
        "codex"
    }

    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    async fn execute(&self, request: AgentRequest) -> Result<AgentOutput, AgentError> {
        if request.resume_session.is_some() {
            debug!("codex cannot resume sessions, starting a new one");
        }
        let output_file =
            std::env::temp_dir().join(format!("flotilla-codex-{}.txt", Uuid::new_v4()));
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(self.build_args(&output_file))
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut guard = ProcessGuard::spawn(&mut cmd, self.config.shutdown_grace)?;

        let child = guard.child_mut();
        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(AgentError::Spawn("failed to capture codex stdio".to_string()));
        };

        let end = {
            let run = async {
                stdin.write_all(request.prompt.as_bytes()).await?;
                drop(stdin);
                let mut out = String::new();
                let mut err = String::new();
                let (o, e) = tokio::join!(
                    stdout.read_to_string(&mut out),
                    stderr.read_to_string(&mut err)
                );
                o?;
                e?;
                let status = guard.wait().await?;
                Ok::<_, std::io::Error>((status, out, err))
            };
            select! {
                r = tokio::time::timeout(request.timeout, run) => match r {
                    Ok(finished) => RunEnd::Finished(finished),
                    Err(_) => RunEnd::TimedOut,
                },
                () = cancelled(request.cancel.as_ref()) => RunEnd::Cancelled,
            }
        };

        let file_contents = tokio::fs::read_to_string(&output_file).await.ok();
        if let Err(e) = tokio::fs::remove_file(&output_file).await {
            debug!(path = %output_file.display(), error = %e, "no codex output file to remove");
        }

        let (status, stdout, stderr) = match end {
            RunEnd::Finished(Ok(done)) => done,
            RunEnd::Finished(Err(e)) => {
                guard.terminate().await;
                return Err(AgentError::Exit {
                    code: -1,
                    message: e.to_string(),
                    partial: String::new(),
                    session_id: String::new(),
                });
            }
            RunEnd::TimedOut => {
                guard.terminate().await;
                return Err(AgentError::Timeout {
                    secs: request.timeout.as_secs(),
                    partial: file_contents.unwrap_or_default(),
                    session_id: String::new(),
                });
            }
            RunEnd::Cancelled => {
                guard.terminate().await;
                return Err(AgentError::Cancelled);
            }
        };

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let message = [stderr.trim(), stdout.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .map_or_else(|| format!("exit {code}"), str::to_string);
            warn!(code, "codex exited with failure");
            return Err(AgentError::Exit {
                code,
                message,
                partial: String::new(),
                session_id: String::new(),
            });
        }

        let text = Self::pick_output(file_contents, &stdout);
        if text.is_empty() {
            return Err(AgentError::EmptyOutput {
                session_id: String::new(),
            });
        }
        Ok(AgentOutput::new(text, ""))
    }

    async fn resume(
        &self,
        _session_id: &str,
        _prompt: &str,
        _timeout: Duration,
    ) -> Result<String, AgentError> {
        Err(AgentError::Unsupported {
            runner: "codex",
            operation: "session resume",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let runner = CodexRunner::new(CodexConfig {
            model: Some("o3".into()),
            ..CodexConfig::default()
        });
        let args = runner.build_args(Path::new("/tmp/out.txt"));
        assert_eq!(args[0], "exec");
        assert!(args.windows(2).any(|w| w == ["--output-last-message", "/tmp/out.txt"]));
        assert!(args.windows(2).any(|w| w == ["--sandbox", "read-only"]));
        assert!(args.windows(2).any(|w| w == ["--model", "o3"]));
    }

    #[test]
    fn test_build_args_without_model() {
        let runner = CodexRunner::new(CodexConfig::default());
        let args = runner.build_args(Path::new("out"));
        assert!(!args.contains(&"--model".to_string()));
    }

    #[test]
    fn test_pick_output_prefers_file() {
        assert_eq!(
            CodexRunner::pick_output(Some(" from file\n".into()), "stdout"),
            "from file"
        );
        assert_eq!(CodexRunner::pick_output(Some("  ".into()), "stdout"), "stdout");
        assert_eq!(CodexRunner::pick_output(None, " stdout "), "stdout");
    }

    #[tokio::test]
    async fn test_resume_is_unsupported() {
        let runner = CodexRunner::new(CodexConfig::default());
        let err = runner
            .resume("s", "p", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let runner = CodexRunner::new(CodexConfig {
            binary_path: "/nonexistent/codex".into(),
            ..CodexConfig::default()
        });
        let err = runner
            .execute(AgentRequest::new("hi", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Spawn(_)));
    }
}
