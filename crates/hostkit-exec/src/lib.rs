//! hostkit-exec: Remote execution
//!
//! Opens SSH sessions for `HostRecord`s, fans a command out to many hosts
//! concurrently and bridges a single remote shell to the local terminal.

pub mod dispatch;
pub mod error;
pub mod local;
pub mod result;
pub mod shell;
pub mod ssh;
pub mod traits;
pub mod verify;

pub use dispatch::{DispatchConfig, DispatchSummary, Dispatcher, ResultTally};
pub use error::ExecError;
pub use local::LocalSessionFactory;
pub use result::{CommandOutput, ExecutionResult};
pub use shell::interactive_shell;
pub use ssh::{SshOptions, SshSession, SshSessionFactory};
pub use traits::{RemoteSession, ResultHandler, SessionFactory};
pub use verify::{HostKeyPolicy, HostKeyVerifier, KeyVerdict};

pub use tokio_util::sync::CancellationToken;
