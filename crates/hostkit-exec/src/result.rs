//! Result types for command execution

use std::borrow::Cow;
use std::time::Duration;

use hostkit_types::HostRecord;

use crate::error::ExecError;

/// Raw output of one command run on one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout
    pub stdout: Vec<u8>,
    /// Captured stderr
    pub stderr: Vec<u8>,
    /// Exit status, if the remote side reported one
    pub exit_status: Option<u32>,
    /// Terminating signal, if the command was killed
    pub exit_signal: Option<String>,
}

impl CommandOutput {
    /// Failure implied by the exit status or signal, if any
    #[must_use]
    pub fn failure(&self) -> Option<ExecError> {
        if let Some(signal) = &self.exit_signal {
            return Some(ExecError::Signaled {
                signal: signal.clone(),
            });
        }
        match self.exit_status {
            Some(0) => None,
            Some(status) => Some(ExecError::CommandFailed { status }),
            None => Some(ExecError::Channel(
                "channel closed without exit status".to_string(),
            )),
        }
    }
}

/// Outcome of running a command on one host
///
/// Exactly one is produced per host per dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Host the command ran against
    pub host: HostRecord,
    /// Command as generated for this host
    pub command: String,
    /// Captured stdout
    pub stdout: Vec<u8>,
    /// Captured stderr
    pub stderr: Vec<u8>,
    /// Exit status, if the command ran to completion
    pub exit_status: Option<u32>,
    /// Failure, `None` on success
    pub error: Option<ExecError>,
    /// Time from session open to result
    pub duration: Duration,
}

impl ExecutionResult {
    /// Build a result from command output
    #[must_use]
    pub fn from_output(
        host: HostRecord,
        command: String,
        output: CommandOutput,
        duration: Duration,
    ) -> Self {
        let error = output.failure();
        Self {
            host,
            command,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.exit_status,
            error,
            duration,
        }
    }

    /// Build a result for a host whose command never produced output
    #[must_use]
    pub fn failed(host: HostRecord, command: String, error: ExecError, duration: Duration) -> Self {
        Self {
            host,
            command,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: None,
            error: Some(error),
            duration,
        }
    }

    /// Whether the command ran and exited with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Host name shortcut
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host.name
    }

    /// stdout decoded lossily as UTF-8
    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// stderr decoded lossily as UTF-8
    #[must_use]
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostRecord {
        HostRecord::new("web1", "root", "10.0.0.1").with_password("pw")
    }

    #[test]
    fn test_zero_exit_is_success() {
        let output = CommandOutput {
            stdout: b"ok\n".to_vec(),
            exit_status: Some(0),
            ..Default::default()
        };
        let result =
            ExecutionResult::from_output(host(), "true".into(), output, Duration::ZERO);

        assert!(result.success());
        assert_eq!(result.stdout_lossy(), "ok\n");
    }

    #[test]
    fn test_non_zero_exit_keeps_output() {
        let output = CommandOutput {
            stderr: b"boom".to_vec(),
            exit_status: Some(3),
            ..Default::default()
        };
        let result =
            ExecutionResult::from_output(host(), "false".into(), output, Duration::ZERO);

        assert_eq!(result.error, Some(ExecError::CommandFailed { status: 3 }));
        assert_eq!(result.stderr_lossy(), "boom");
    }

    #[test]
    fn test_signal_takes_precedence() {
        let output = CommandOutput {
            exit_signal: Some("KILL".to_string()),
            ..Default::default()
        };
        assert!(matches!(output.failure(), Some(ExecError::Signaled { .. })));
    }

    #[test]
    fn test_missing_exit_status_is_failure() {
        assert!(matches!(
            CommandOutput::default().failure(),
            Some(ExecError::Channel(_))
        ));
    }
}
