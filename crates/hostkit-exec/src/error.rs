//! Error types for hostkit-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while opening sessions or running commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Failed to reach the remote endpoint
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed {
        /// `address:port` that was dialed
        endpoint: String,
        /// Transport error
        reason: String,
    },

    /// Remote host key did not pass verification
    #[error("host key for {endpoint} rejected: {reason}")]
    HostKeyRejected {
        /// `address:port` that was dialed
        endpoint: String,
        /// Verification outcome
        reason: String,
    },

    /// Server refused the credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Private key could not be read or parsed
    #[error("failed to load private key {path}: {reason}")]
    KeyLoad {
        /// Key file path
        path: String,
        /// Read or parse error
        reason: String,
    },

    /// Remote command exited with a non-zero status
    #[error("command exited with status {status}")]
    CommandFailed {
        /// Exit status reported by the remote side
        status: u32,
    },

    /// Remote command was killed by a signal
    #[error("command terminated by signal {signal}")]
    Signaled {
        /// Signal name
        signal: String,
    },

    /// Exec channel failed mid-run
    #[error("channel error: {0}")]
    Channel(String),

    /// Per-host time limit exceeded
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// Limit that was exceeded
        timeout: Duration,
    },

    /// Dispatch was cancelled before the host finished
    #[error("cancelled")]
    Cancelled,

    /// Local terminal could not be set up
    #[error("terminal error: {0}")]
    Terminal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Per-host task aborted unexpectedly
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl ExecError {
    /// Check if the error happened before a session was established
    #[must_use]
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed { .. }
                | ExecError::HostKeyRejected { .. }
                | ExecError::AuthenticationFailed(_)
                | ExecError::KeyLoad { .. }
        )
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}
