//! JSON import and export of host records

use std::fs;
use std::path::Path;

use hostkit_types::HostRecord;
use tracing::{info, instrument, warn};

use crate::error::RegistryError;
use crate::registry::HostRegistry;

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Number of records found in the file
    pub tried: usize,
    /// Names of records that could not be stored
    pub failures: Vec<String>,
}

impl ImportReport {
    /// Number of records stored
    #[must_use]
    pub fn imported(&self) -> usize {
        self.tried - self.failures.len()
    }
}

/// Import every host from the JSON array at `path`
///
/// Records are stored one by one; a record that fails validation or cannot
/// be written is reported in [`ImportReport::failures`] and does not stop
/// the import. Existing hosts with the same name are overwritten.
///
/// # Errors
/// Returns `RegistryError` if the file cannot be read or is not a JSON array
/// of host objects
#[instrument(skip(registry), fields(path = %path.as_ref().display()))]
pub fn import_hosts(
    registry: &HostRegistry,
    path: impl AsRef<Path>,
) -> Result<ImportReport, RegistryError> {
    let content = fs::read(path.as_ref())?;
    let hosts: Vec<HostRecord> = serde_json::from_slice(&content)?;

    let mut report = ImportReport {
        tried: hosts.len(),
        failures: Vec::new(),
    };

    for host in &hosts {
        if let Err(e) = registry.add(host) {
            warn!(host = %host.name, error = %e, "failed to import host");
            report.failures.push(host.name.clone());
        }
    }

    info!(
        tried = report.tried,
        failed = report.failures.len(),
        "import finished"
    );

    Ok(report)
}

/// Write every host to `path` as a pretty-printed JSON array sorted by name
///
/// Returns the number of hosts written.
///
/// # Errors
/// Returns `RegistryError` if the registry cannot be read or the file
/// cannot be written
#[instrument(skip(registry), fields(path = %path.as_ref().display()))]
pub fn export_hosts(
    registry: &HostRegistry,
    path: impl AsRef<Path>,
) -> Result<usize, RegistryError> {
    let mut hosts = registry.list()?;
    hosts.sort_by(|a, b| a.name.cmp(&b.name));

    let encoded = serde_json::to_string_pretty(&hosts)?;
    fs::write(path.as_ref(), encoded)?;

    info!(count = hosts.len(), "export finished");
    Ok(hosts.len())
}
