//! hostkit-types: Shared host inventory types
//!
//! Contains the `HostRecord` value type and its validation rules, used by the
//! registry, the executor and the CLI.

pub mod error;
pub mod host;

pub use error::ValidationError;
pub use host::{DEFAULT_PORT, HOST_KEY_PREFIX, HostRecord};
