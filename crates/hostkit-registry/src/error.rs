//! Error types for hostkit-registry

use std::path::PathBuf;

use hostkit_types::ValidationError;
use thiserror::Error;

/// Errors that can occur during registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Underlying store failed
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Store is corrupted and the recovery attempt failed
    #[error("store at {path} is corrupted and could not be recovered: {reason}")]
    Corrupted {
        /// Database file
        path: PathBuf,
        /// Why recovery failed
        reason: String,
    },

    /// Record rejected before any write
    #[error("invalid host: {0}")]
    Validation(#[from] ValidationError),

    /// No record stored under the given name
    #[error("host not found: {0}")]
    NotFound(String),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Empty or unusable store path
    #[error("invalid store path: {0}")]
    InvalidPath(String),
}

impl RegistryError {
    /// Check if the error means the host does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    /// Check if the record was rejected by validation
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, RegistryError::Validation(_))
    }
}
