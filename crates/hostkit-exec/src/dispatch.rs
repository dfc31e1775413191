//! Concurrent command fan-out
//!
//! [`Dispatcher::dispatch`] runs one task per host, hands each
//! [`ExecutionResult`] to a [`ResultHandler`] as soon as it is ready and
//! returns once every host has produced exactly one result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use hostkit_types::HostRecord;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandOutput, ExecutionResult};
use crate::traits::{ResultHandler, SessionFactory};

/// Default bound on hosts running at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Dispatch tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Hosts running at once; values below 1 are treated as 1
    pub max_in_flight: usize,
    /// Per-host limit covering session open and command run
    pub command_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            command_timeout: None,
        }
    }
}

/// Counts for one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Hosts handed to the dispatch
    pub total: usize,
    /// Results without an error
    pub succeeded: usize,
    /// Results carrying an error, including cancelled and timed-out hosts
    pub failed: usize,
}

impl DispatchSummary {
    /// Whether every host succeeded
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Runs a command across many hosts
pub struct Dispatcher {
    factory: Arc<dyn SessionFactory>,
    config: DispatchConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("factory", &self.factory.factory_type())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher with default config
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            config: DispatchConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set dispatch config
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an external cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels in-flight dispatches when triggered
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `generate(host)` on every host in `hosts`
    ///
    /// Results reach `handler` in completion order. Failures stay inside
    /// their host's result; a cancelled, timed-out or panicked host still
    /// yields one. Returns after the last result has been handled.
    #[instrument(skip_all, fields(hosts = hosts.len(), factory = self.factory.factory_type()))]
    pub async fn dispatch<G, H>(
        &self,
        hosts: Vec<HostRecord>,
        generate: G,
        handler: &H,
    ) -> DispatchSummary
    where
        G: Fn(&HostRecord) -> String,
        H: ResultHandler + ?Sized,
    {
        let mut summary = DispatchSummary {
            total: hosts.len(),
            ..DispatchSummary::default()
        };
        if hosts.is_empty() {
            debug!("no hosts to dispatch to");
            return summary;
        }

        info!(
            total_hosts = summary.total,
            max_in_flight = self.config.max_in_flight,
            timeout = ?self.config.command_timeout,
            "starting dispatch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(hosts.len());

        for host in hosts {
            let command = generate(&host);
            let task = HostTask {
                factory: Arc::clone(&self.factory),
                semaphore: Arc::clone(&semaphore),
                cancel: self.cancel.clone(),
                limit: self.config.command_timeout,
                host: host.clone(),
                command: command.clone(),
            };
            let handle = tasks.spawn(task.run());
            pending.insert(handle.id(), (host, command));
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    pending.remove(&id);
                    result
                }
                Err(e) => {
                    let Some((host, command)) = pending.remove(&e.id()) else {
                        error!(error = %e, "join error for unknown task");
                        continue;
                    };
                    error!(host = %host.name, error = %e, "host task panicked");
                    ExecutionResult::failed(
                        host,
                        command,
                        ExecError::TaskFailed(e.to_string()),
                        Duration::ZERO,
                    )
                }
            };

            if result.success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            handler.handle(result);
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "dispatch finished"
        );

        summary
    }
}

struct HostTask {
    factory: Arc<dyn SessionFactory>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    limit: Option<Duration>,
    host: HostRecord,
    command: String,
}

impl HostTask {
    async fn run(self) -> ExecutionResult {
        let mut started = None;

        let outcome = {
            let work = async {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| ExecError::Cancelled)?;
                started = Some(Instant::now());
                match self.limit {
                    Some(limit) => timeout(limit, self.execute())
                        .await
                        .map_err(|_| ExecError::Timeout { timeout: limit })?,
                    None => self.execute().await,
                }
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(ExecError::Cancelled),
                res = work => res,
            }
        };

        let duration = started.map(|s| s.elapsed()).unwrap_or_default();

        match outcome {
            Ok(output) => {
                let result =
                    ExecutionResult::from_output(self.host, self.command, output, duration);
                if let Some(e) = &result.error {
                    warn!(host = %result.host.name, error = %e, "command failed");
                } else {
                    debug!(host = %result.host.name, duration = ?duration, "command succeeded");
                }
                result
            }
            Err(e) => {
                warn!(host = %self.host.name, error = %e, "host failed");
                ExecutionResult::failed(self.host, self.command, e, duration)
            }
        }
    }

    /// Open, run, close; a dropped future drops the session too
    async fn execute(&self) -> Result<CommandOutput, ExecError> {
        let mut session = self.factory.open(&self.host).await?;
        let output = session.exec(&self.command).await;
        session.close().await;
        output
    }
}

/// Thread-safe success/failure name lists
///
/// Usable directly as a [`ResultHandler`] or fed from a closure that also
/// prints each result.
#[derive(Debug, Default)]
pub struct ResultTally {
    inner: Mutex<TallyLists>,
}

#[derive(Debug, Default)]
struct TallyLists {
    succeeded: Vec<String>,
    failed: Vec<String>,
}

impl ResultTally {
    /// Create an empty tally
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one result under its host name
    pub fn record(&self, result: &ExecutionResult) {
        let mut lists = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let name = result.host_name().to_string();
        if result.success() {
            lists.succeeded.push(name);
        } else {
            lists.failed.push(name);
        }
    }

    /// Hosts that succeeded, sorted by name
    #[must_use]
    pub fn succeeded(&self) -> Vec<String> {
        let mut names = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .succeeded
            .clone();
        names.sort();
        names
    }

    /// Hosts that failed, sorted by name
    #[must_use]
    pub fn failed(&self) -> Vec<String> {
        let mut names = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failed
            .clone();
        names.sort();
        names
    }

    /// Results recorded so far
    #[must_use]
    pub fn total(&self) -> usize {
        let lists = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        lists.succeeded.len() + lists.failed.len()
    }
}

impl ResultHandler for ResultTally {
    fn handle(&self, result: ExecutionResult) {
        self.record(&result);
    }
}
