//! Configuration loading and types

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hostkit_exec::{DispatchConfig, HostKeyPolicy, SshOptions};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "HOSTKIT_CONFIG";
/// Environment variable naming the database file
pub const DB_ENV: &str = "HOSTKIT_DB";

/// Top-level configuration for hostkit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Host database settings
    #[serde(default)]
    pub store: StoreConfig,
    /// SSH client settings
    #[serde(default)]
    pub ssh: SshConfig,
    /// Fan-out settings for `ssh command`
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Host database settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; `<data_dir>/hostkit/hosts.db` when unset
    pub path: Option<PathBuf>,
}

/// Host key policy as written in the config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicySetting {
    #[default]
    KnownHosts,
    TrustOnFirstUse,
    AcceptAny,
}

impl From<HostKeyPolicySetting> for HostKeyPolicy {
    fn from(setting: HostKeyPolicySetting) -> Self {
        match setting {
            HostKeyPolicySetting::KnownHosts => HostKeyPolicy::KnownHosts,
            HostKeyPolicySetting::TrustOnFirstUse => HostKeyPolicy::TrustOnFirstUse,
            HostKeyPolicySetting::AcceptAny => HostKeyPolicy::AcceptAny,
        }
    }
}

/// SSH client settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub host_key_policy: HostKeyPolicySetting,
    /// known_hosts file; `~/.ssh/known_hosts` when unset
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout_secs: Option<u64>,
    /// Pinned `SHA256:` fingerprints by host name
    #[serde(default)]
    pub fingerprints: HashMap<String, String>,
}

/// Fan-out settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    pub command_timeout_secs: Option<u64>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            command_timeout_secs: None,
        }
    }
}

fn default_max_in_flight() -> usize {
    hostkit_exec::dispatch::DEFAULT_MAX_IN_FLIGHT
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// First config file found, if any
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let paths = [
            Some(PathBuf::from("hostkit.toml")),
            dirs::config_dir().map(|p| p.join("hostkit/hostkit.toml")),
        ];

        paths.into_iter().flatten().find(|path| path.exists())
    }

    /// Load from `path`, or from default paths, or use defaults
    ///
    /// Environment overrides are applied on top.
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be read or parsed
    pub fn load_or_default(path: Option<&Path>) -> eyre::Result<Self> {
        let located = path.map(Path::to_path_buf).or_else(Self::locate);
        let mut config = match located {
            Some(path) => Self::load(&path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides looked up through `var`
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = var(DB_ENV).filter(|v| !v.is_empty()) {
            self.store.path = Some(PathBuf::from(db));
        }
    }

    /// Database file to open
    ///
    /// # Errors
    /// Returns error if no path is configured and the platform has no data
    /// directory
    pub fn db_path(&self) -> eyre::Result<PathBuf> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("hostkit").join("hosts.db"))
            .ok_or_else(|| eyre::eyre!("no data directory found; set store.path or {DB_ENV}"))
    }

    /// SSH options for the session factory
    #[must_use]
    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            host_key_policy: self.ssh.host_key_policy.into(),
            known_hosts: self.ssh.known_hosts.clone(),
            pinned_fingerprints: self.ssh.fingerprints.clone(),
            connect_timeout: self.ssh.connect_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Dispatcher settings
    #[must_use]
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_in_flight: self.dispatch.max_in_flight,
            command_timeout: self.dispatch.command_timeout_secs.map(Duration::from_secs),
        }
    }
}
