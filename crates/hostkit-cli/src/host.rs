//! `hostkit host ...` commands

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use eyre::{Result, WrapErr, bail};
use hostkit_registry::{HostRegistry, export_hosts, import_hosts};
use hostkit_types::{DEFAULT_PORT, HostRecord};
use tracing::info;

use crate::report;

#[derive(Subcommand)]
pub enum HostCommand {
    /// Import hosts from a JSON file
    Import(PathArgs),
    /// Export all hosts to a JSON file
    Export(PathArgs),
    /// Add a host (overwrites a host with the same name)
    Add(HostArgs),
    /// Show one host
    Get(NameArgs),
    /// Show all hosts
    Gets,
    /// Replace an existing host
    Update(HostArgs),
    /// Delete a host
    Delete(NameArgs),
}

#[derive(Args)]
pub struct PathArgs {
    /// JSON file path
    #[arg(long)]
    pub path: PathBuf,
}

#[derive(Args)]
pub struct NameArgs {
    /// Host name
    #[arg(short, long)]
    pub name: String,
}

#[derive(Args)]
pub struct HostArgs {
    /// Host name
    #[arg(short, long)]
    pub name: String,
    /// SSH user
    #[arg(short, long)]
    pub user: String,
    /// Hostname or IP address
    #[arg(short, long)]
    pub address: String,
    /// SSH port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// SSH password
    #[arg(long, visible_alias = "pwd")]
    pub password: Option<String>,
    /// Private key file
    #[arg(long = "keypath")]
    pub key_path: Option<String>,
    /// Free-form description
    #[arg(short, long)]
    pub description: Option<String>,
}

impl HostArgs {
    pub fn into_record(self) -> HostRecord {
        HostRecord {
            name: self.name,
            user: self.user,
            address: self.address,
            port: self.port,
            password: self.password.filter(|p| !p.is_empty()),
            key_path: self.key_path.filter(|k| !k.is_empty()),
            description: self.description.filter(|d| !d.is_empty()),
        }
    }
}

/// Open the registry at `db`, run `f`, close it on every path
pub fn with_registry<T, F>(db: &Path, f: F) -> Result<T>
where
    F: FnOnce(&HostRegistry) -> Result<T>,
{
    let registry = HostRegistry::open(db)
        .wrap_err_with(|| format!("failed to open host database {}", db.display()))?;
    let result = f(&registry);
    let closed = registry.close();
    let value = result?;
    closed.wrap_err("failed to close host database")?;
    Ok(value)
}

pub fn run(command: HostCommand, db: &Path) -> Result<()> {
    with_registry(db, |registry| match command {
        HostCommand::Import(args) => {
            let report = import_hosts(registry, &args.path)
                .wrap_err_with(|| format!("failed to import {}", args.path.display()))?;
            println!(
                "import hosts result >> tried: {} / failures: {} {:?}",
                report.tried,
                report.failures.len(),
                report.failures
            );
            Ok(())
        }
        HostCommand::Export(args) => {
            let count = export_hosts(registry, &args.path)
                .wrap_err_with(|| format!("failed to export to {}", args.path.display()))?;
            println!("exported {count} hosts to {}", args.path.display());
            Ok(())
        }
        HostCommand::Add(args) => {
            let host = args.into_record();
            registry.add(&host)?;
            info!(host = %host.name, "host saved");
            println!("saved host {}", host.name);
            Ok(())
        }
        HostCommand::Get(args) => {
            if args.name.is_empty() {
                bail!("host name must not be empty");
            }
            let host = registry.get(&args.name)?;
            print!("{}", report::format_hosts(&[host]));
            Ok(())
        }
        HostCommand::Gets => {
            let hosts = registry.list()?;
            print!("{}", report::format_hosts(&hosts));
            Ok(())
        }
        HostCommand::Update(args) => {
            let host = args.into_record();
            registry.update(&host)?;
            println!("updated host {}", host.name);
            Ok(())
        }
        HostCommand::Delete(args) => {
            registry.delete(&args.name)?;
            println!("deleted host {}", args.name);
            Ok(())
        }
    })
}
