//! hostkit CLI
//!
//! Host inventory plus fan-out SSH command execution

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod config;
mod host;
mod report;
mod ssh;

use config::Config;

#[derive(Parser)]
#[command(name = "hostkit")]
#[command(about = "Host inventory and fan-out SSH commands", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (overrides HOSTKIT_CONFIG and default locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored hosts
    #[command(subcommand)]
    Host(host::HostCommand),
    /// Run commands on stored hosts
    #[command(subcommand)]
    Ssh(ssh::SshCommand),
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = Some(db);
    }

    let level = if cli.verbose {
        "debug"
    } else {
        config.log.level.as_str()
    };
    init_tracing(level);

    let db = config.db_path()?;
    debug!(db = %db.display(), "using host database");

    match cli.command {
        Commands::Host(command) => {
            host::run(command, &db)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ssh(command) => ssh::run(command, &config, &db).await,
    }
}
