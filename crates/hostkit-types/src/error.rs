//! Validation errors for host records

use thiserror::Error;

/// Reasons a `HostRecord` cannot be stored
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Host name is empty
    #[error("host name must not be empty")]
    MissingName,

    /// Neither a password nor a key path is set
    #[error("host {0} must have at least a password or a key path")]
    MissingCredentials(String),

    /// Port zero is not connectable
    #[error("host {0} has an invalid port 0")]
    InvalidPort(String),
}
