//! Agent runner port - interface for coding-agent backends.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::AgentError;
use crate::domain::models::{AgentOutput, AgentRequest};

/// A coding-capable agent that executes one instruction to completion.
///
/// Implementations own the child process for the duration of a call and must
/// terminate it on every exit path, including timeout and cancellation.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use flotilla::domain::models::AgentRequest;
/// use flotilla::domain::ports::AgentRunner;
///
/// async fn example(runner: &dyn AgentRunner) {
///     let request = AgentRequest::new("Create go.mod", Duration::from_secs(900));
///     match runner.execute(request).await {
///         Ok(output) => println!("{}", output.text),
///         Err(err) => eprintln!("failed: {err} (partial: {})", err.partial()),
///     }
/// }
/// ```
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Run the request until the agent produces terminal output.
    async fn execute(&self, request: AgentRequest) -> Result<AgentOutput, AgentError>;

    /// Continue an earlier session with a follow-up prompt.
    ///
    /// Used for the reformat retry and for best-effort failure summaries.
    async fn resume(
        &self,
        session_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, AgentError>;
}
