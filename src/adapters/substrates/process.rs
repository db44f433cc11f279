//! Scoped ownership of agent child processes.
//!
//! Every agent CLI is spawned as the leader of its own process group so that
//! the tools it launches can be signalled together. A [`ProcessGuard`] owns the
//! child: [`ProcessGuard::terminate`] sends SIGTERM to the group, waits a grace
//! period, then escalates to SIGKILL; dropping a guard whose child has not been
//! reaped sends SIGKILL to the group immediately.

use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::domain::errors::AgentError;

pub struct ProcessGuard {
    child: Child,
    pgid: Option<Pid>,
    grace: Duration,
    reaped: bool,
}

impl ProcessGuard {
    /// Spawn `command` in a fresh process group.
    pub fn spawn(command: &mut Command, grace: Duration) -> Result<Self, AgentError> {
        command.process_group(0).kill_on_drop(true);
        let child = command
            .spawn()
            .map_err(|e| AgentError::Spawn(e.to_string()))?;
        let pgid = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(Pid::from_raw);
        debug!(pgid = ?pgid, "agent process spawned");
        Ok(Self {
            child,
            pgid,
            grace,
            reaped: false,
        })
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Wait for the child to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        Ok(status)
    }

    /// Graceful termination: SIGTERM the group, then SIGKILL after the grace
    /// period.
    pub async fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        self.signal(Signal::SIGTERM);
        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "error waiting for agent process"),
            Err(_) => {
                warn!(grace_secs = self.grace.as_secs(), "agent ignored SIGTERM, killing");
                self.signal(Signal::SIGKILL);
                if let Err(e) = self.child.wait().await {
                    warn!(error = %e, "error reaping killed agent process");
                }
            }
        }
        self.reaped = true;
    }

    fn signal(&self, signal: Signal) {
        if let Some(pgid) = self.pgid {
            if let Err(errno) = killpg(pgid, signal) {
                // ESRCH: the group is already gone
                debug!(pgid = %pgid, signal = ?signal, errno = %errno, "killpg failed");
            }
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.signal(Signal::SIGKILL);
        }
    }
}
