//! Session and result handler traits

use async_trait::async_trait;
use hostkit_types::HostRecord;

use crate::error::ExecError;
use crate::result::{CommandOutput, ExecutionResult};

/// Opens authenticated sessions to hosts
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Negotiate a session with `host`
    async fn open(&self, host: &HostRecord) -> Result<Box<dyn RemoteSession>, ExecError>;

    fn factory_type(&self) -> &'static str;
}

/// One open session to one host
///
/// Dropping a session releases it; [`RemoteSession::close`] does so
/// gracefully.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command` to completion on a fresh exec channel
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Close the session
    async fn close(self: Box<Self>);
}

/// Receives execution results as hosts finish
///
/// Called from the dispatching task while other hosts are still running,
/// so any shared state it mutates must be synchronized.
pub trait ResultHandler: Send + Sync {
    fn handle(&self, result: ExecutionResult);
}

impl<F> ResultHandler for F
where
    F: Fn(ExecutionResult) + Send + Sync,
{
    fn handle(&self, result: ExecutionResult) {
        self(result);
    }
}
