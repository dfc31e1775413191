//! Loopback sessions using `tokio::process`
//!
//! Every host is treated as the local machine. Useful for dry runs of a
//! command template and for exercising the dispatcher without a network.

use std::process::Stdio;

use async_trait::async_trait;
use hostkit_types::HostRecord;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::ExecError;
use crate::result::CommandOutput;
use crate::traits::{RemoteSession, SessionFactory};

/// Factory for [`LocalSession`]s
#[derive(Debug, Clone, Default)]
pub struct LocalSessionFactory;

impl LocalSessionFactory {
    /// Create a new local session factory
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Runs commands with `sh -c` on the local machine
#[derive(Debug, Clone)]
pub struct LocalSession {
    host: String,
}

impl LocalSession {
    #[instrument(skip(self), fields(host = %self.host), level = "debug")]
    async fn execute(&self, cmd: &str) -> Result<CommandOutput, ExecError> {
        debug!(command = %cmd, "executing local command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Channel(format!("failed to spawn sh: {e}")))?;

        let output = child.wait_with_output().await?;

        let exit_status = output.status.code().and_then(|c| u32::try_from(c).ok());
        let exit_signal = if exit_status.is_none() {
            Some(signal_name(&output.status))
        } else {
            None
        };

        if !output.status.success() {
            warn!(command = %cmd, status = ?output.status, "local command failed");
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status,
            exit_signal,
        })
    }
}

#[cfg(unix)]
fn signal_name(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    status
        .signal()
        .map_or_else(|| "unknown".to_string(), |s| s.to_string())
}

#[cfg(not(unix))]
fn signal_name(_status: &std::process::ExitStatus) -> String {
    "unknown".to_string()
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecError> {
        self.execute(command).await
    }

    async fn close(self: Box<Self>) {}
}

#[async_trait]
impl SessionFactory for LocalSessionFactory {
    async fn open(&self, host: &HostRecord) -> Result<Box<dyn RemoteSession>, ExecError> {
        Ok(Box::new(LocalSession {
            host: host.name.clone(),
        }))
    }

    fn factory_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session() -> Box<dyn RemoteSession> {
        let host = HostRecord::new("localhost", "me", "127.0.0.1").with_password("x");
        LocalSessionFactory::new().open(&host).await.unwrap()
    }

    #[tokio::test]
    async fn test_exec_success() {
        let mut session = session().await;
        let output = session.exec("echo hello").await.unwrap();

        assert_eq!(output.exit_status, Some(0));
        assert_eq!(output.stdout, b"hello\n");
        assert!(output.failure().is_none());
    }

    #[tokio::test]
    async fn test_exec_failure() {
        let mut session = session().await;
        let output = session.exec("exit 42").await.unwrap();

        assert_eq!(output.exit_status, Some(42));
        assert_eq!(
            output.failure(),
            Some(ExecError::CommandFailed { status: 42 })
        );
    }

    #[tokio::test]
    async fn test_exec_with_stderr() {
        let mut session = session().await;
        let output = session.exec("echo error >&2").await.unwrap();

        assert!(output.stdout.is_empty());
        assert_eq!(output.stderr, b"error\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_killed_by_signal() {
        let mut session = session().await;
        let output = session.exec("kill -9 $$").await.unwrap();

        assert_eq!(output.exit_status, None);
        assert_eq!(output.exit_signal.as_deref(), Some("9"));
        assert!(matches!(output.failure(), Some(ExecError::Signaled { .. })));
    }
}
