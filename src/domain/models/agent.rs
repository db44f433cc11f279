//! Agent invocation request and output.

use std::time::Duration;

use tokio::sync::mpsc;

use super::cancellation::CancelSignal;

/// Sender for incremental `<progress>` markers emitted mid-run.
pub type ProgressSender = mpsc::UnboundedSender<String>;

/// One instruction handed to an agent runner.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Full prompt, including ambient project context
    pub prompt: String,
    /// Hard ceiling enforced by the runner
    pub timeout: Duration,
    /// Turn budget; `None` leaves the CLI default
    pub max_turns: Option<u32>,
    /// Where progress markers go, if anyone is listening
    pub progress: Option<ProgressSender>,
    /// Observed at every suspension point of the invocation
    pub cancel: Option<CancelSignal>,
    /// Earlier session to continue instead of starting a new one
    pub resume_session: Option<String>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            timeout,
            max_turns: None,
            progress: None,
            cancel: None,
            resume_session: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Continue `session_id` when non-empty.
    pub fn with_resume(mut self, session_id: &str) -> Self {
        if !session_id.is_empty() {
            self.resume_session = Some(session_id.to_string());
        }
        self
    }
}

/// Terminal output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    pub text: String,
    /// Session that can later be resumed; empty when the backend has none
    pub session_id: String,
}

impl AgentOutput {
    pub fn new(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.into(),
        }
    }
}
