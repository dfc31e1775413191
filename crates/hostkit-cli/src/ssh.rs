//! `hostkit ssh ...` commands

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use eyre::{Result, bail};
use hostkit_exec::{
    Dispatcher, ExecutionResult, LocalSessionFactory, ResultTally, SessionFactory,
    SshSessionFactory, interactive_shell,
};
use hostkit_types::HostRecord;
use tracing::{info, warn};

use crate::config::Config;
use crate::host::with_registry;
use crate::report;

#[derive(Subcommand)]
pub enum SshCommand {
    /// Open an interactive shell on one host
    Shell {
        /// Host name
        host: String,
    },
    /// Run a command on one or more hosts
    Command(CommandArgs),
}

#[derive(Args)]
pub struct CommandArgs {
    /// Comma-separated host names
    pub hosts: String,
    /// Command to run; `{name}`, `{user}`, `{address}` and `{port}` are
    /// replaced per host
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
    /// Run on this machine instead of connecting
    #[arg(long)]
    pub loopback: bool,
    /// Hosts running at once
    #[arg(long)]
    pub max_in_flight: Option<usize>,
    /// Per-host timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn run(command: SshCommand, config: &Config, db: &Path) -> Result<ExitCode> {
    match command {
        SshCommand::Shell { host } => shell(&host, config, db).await,
        SshCommand::Command(args) => execute(args, config, db).await,
    }
}

/// Split a comma-separated list, dropping blanks and repeats
pub fn parse_host_list(list: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Resolve every name or fail naming the missing ones
fn resolve_hosts(db: &Path, names: &[String]) -> Result<Vec<HostRecord>> {
    with_registry(db, |registry| {
        let mut hosts = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            if registry.has(name)? {
                hosts.push(registry.get(name)?);
            } else {
                missing.push(name.as_str());
            }
        }
        if !missing.is_empty() {
            bail!("unknown hosts: {}", missing.join(", "));
        }
        Ok(hosts)
    })
}

async fn shell(name: &str, config: &Config, db: &Path) -> Result<ExitCode> {
    let host = with_registry(db, |registry| Ok(registry.get(name)?))?;

    let factory = SshSessionFactory::new(config.ssh_options());
    let session = factory.connect(&host).await?;
    let status = interactive_shell(&session).await;
    session.disconnect().await;

    Ok(match status? {
        Some(0) | None => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
    })
}

async fn execute(args: CommandArgs, config: &Config, db: &Path) -> Result<ExitCode> {
    let names = parse_host_list(&args.hosts);
    if names.is_empty() {
        bail!("no host names given");
    }
    let template = args.command.join(" ");
    let hosts = resolve_hosts(db, &names)?;

    let mut dispatch_config = config.dispatch_config();
    if let Some(limit) = args.max_in_flight {
        dispatch_config.max_in_flight = limit;
    }
    if let Some(secs) = args.timeout {
        dispatch_config.command_timeout = Some(Duration::from_secs(secs));
    }

    let factory: Arc<dyn SessionFactory> = if args.loopback {
        Arc::new(LocalSessionFactory::new())
    } else {
        Arc::new(SshSessionFactory::new(config.ssh_options()))
    };
    let dispatcher = Dispatcher::new(factory).with_config(dispatch_config);

    let cancel = dispatcher.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling remaining hosts");
            cancel.cancel();
        }
    });

    let tally = ResultTally::new();
    let summary = dispatcher
        .dispatch(
            hosts,
            |host| report::render_template(&template, host),
            &|result: ExecutionResult| {
                print!("{}", report::format_result(&result));
                tally.record(&result);
            },
        )
        .await;
    interrupt.abort();

    print!("{}", report::format_summary(&tally));
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "command finished"
    );

    Ok(if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
