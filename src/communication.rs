//! Lifecycle of the emulated network session that carries the traffic.
//!
//! Every episode is bracketed by `start(tag)` and `stop()`. A session is an
//! owned resource: the orchestrator holds the only handle and must reach
//! `stop()` even when the episode fails.

use crate::config::CommunicationConfig;
use crate::error::CommunicationError;
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Start/stop pair around one episode's traffic.
#[async_trait]
pub trait Communication: Send + fmt::Debug {
    /// Starts a session identified by `tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if a session is already running or a process fails
    /// to spawn. Nothing is left running on error.
    async fn start(&mut self, tag: &str) -> Result<(), CommunicationError>;

    /// Tears down the running session.
    ///
    /// # Errors
    ///
    /// Returns an error if no session is running or a process could not be
    /// stopped. The session is considered gone either way.
    async fn stop(&mut self) -> Result<(), CommunicationError>;
}

#[derive(Debug)]
struct Session {
    tag: String,
    processes: Vec<(&'static str, Child)>,
}

/// Runs the configured server and client commands as child processes.
#[derive(Debug)]
pub struct ProcessCommunication {
    server_command: Option<String>,
    client_command: Option<String>,
    settle: Duration,
    stop_timeout: Duration,
    session: Option<Session>,
}

impl ProcessCommunication {
    /// Creates an idle session manager.
    #[must_use]
    pub fn new(config: &CommunicationConfig) -> Self {
        Self {
            server_command: config.server_command.clone(),
            client_command: config.client_command.clone(),
            settle: Duration::from_millis(config.settle_millis),
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
            session: None,
        }
    }

    /// Tag of the running session, if any.
    #[must_use]
    pub fn active_tag(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.tag.as_str())
    }

    fn spawn(role: &'static str, template: &str, tag: &str) -> Result<Child, CommunicationError> {
        let command = template.replace("{tag}", tag);
        debug!(role, command = %command, "spawning session process");
        Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommunicationError::spawn_failed(role, e.to_string()))
    }

    async fn terminate(&self, role: &'static str, child: &mut Child) -> Result<(), CommunicationError> {
        if let Ok(Some(status)) = child.try_wait() {
            debug!(role, %status, "session process already exited");
            return Ok(());
        }

        send_sigterm(child);

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(role, %status, "session process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(CommunicationError::stop_failed(role, e.to_string())),
            Err(_elapsed) => {
                warn!(
                    role,
                    timeout_secs = self.stop_timeout.as_secs(),
                    "session process ignored SIGTERM, killing"
                );
                child
                    .kill()
                    .await
                    .map_err(|e| CommunicationError::stop_failed(role, e.to_string()))
            }
        }
    }

    async fn shutdown(&self, mut session: Session) -> Result<(), CommunicationError> {
        let mut first_error = None;
        // client first, then server
        while let Some((role, mut child)) = session.processes.pop() {
            if let Err(e) = self.terminate(role, &mut child).await {
                warn!(role, error = %e, "failed to stop session process");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM not delivered");
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

#[async_trait]
impl Communication for ProcessCommunication {
    async fn start(&mut self, tag: &str) -> Result<(), CommunicationError> {
        if let Some(session) = &self.session {
            return Err(CommunicationError::already_started(session.tag.clone()));
        }

        let mut session = Session {
            tag: tag.to_string(),
            processes: Vec::with_capacity(2),
        };

        if let Some(server) = &self.server_command {
            let child = Self::spawn("server", server, tag)?;
            session.processes.push(("server", child));
            tokio::time::sleep(self.settle).await;
        }

        if let Some(client) = &self.client_command {
            match Self::spawn("client", client, tag) {
                Ok(child) => session.processes.push(("client", child)),
                Err(e) => {
                    if let Err(stop_error) = self.shutdown(session).await {
                        warn!(error = %stop_error, "cleanup after failed start also failed");
                    }
                    return Err(e);
                }
            }
        }

        info!(tag, processes = session.processes.len(), "communication started");
        self.session = Some(session);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CommunicationError> {
        let session = self
            .session
            .take()
            .ok_or_else(CommunicationError::not_started)?;
        let tag = session.tag.clone();
        let result = self.shutdown(session).await;
        info!(tag = %tag, ok = result.is_ok(), "communication stopped");
        result
    }
}
