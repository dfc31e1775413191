//! Host record type

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Namespace prefix for host entries in the key-value store
pub const HOST_KEY_PREFIX: &str = "host.";

/// One remote endpoint and the credentials used to reach it
///
/// The JSON form uses the field names `name`, `user`, `address`, `port`,
/// `password`, `keypath` and `description`. Empty strings in optional
/// fields are read back as absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Unique host name, also the storage key
    pub name: String,
    /// SSH user
    #[serde(default)]
    pub user: String,
    /// Hostname or IP address
    #[serde(default)]
    pub address: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Password for password authentication
    #[serde(
        default,
        deserialize_with = "empty_as_none"
    )]
    pub password: Option<String>,
    /// Path to a private key file
    #[serde(
        rename = "keypath",
        default,
        deserialize_with = "empty_as_none"
    )]
    pub key_path: Option<String>,
    /// Free-form description
    #[serde(
        default,
        deserialize_with = "empty_as_none"
    )]
    pub description: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

impl std::fmt::Debug for HostRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRecord")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("key_path", &self.key_path)
            .field("description", &self.description)
            .finish()
    }
}

impl HostRecord {
    /// Create a record with the default port and no credentials
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            address: address.into(),
            port: DEFAULT_PORT,
            password: None,
            key_path: None,
            description: None,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into()).filter(|p| !p.is_empty());
        self
    }

    /// Set private key path
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<String>) -> Self {
        self.key_path = Some(path.into()).filter(|p| !p.is_empty());
        self
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into()).filter(|d| !d.is_empty());
        self
    }

    /// Whether a password or a key path is present
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
            || self.key_path.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Check the invariants a record must satisfy before it is stored
    ///
    /// # Errors
    /// Returns `ValidationError` if the name is empty, the port is zero or
    /// no credential is set
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort(self.name.clone()));
        }
        if !self.has_credentials() {
            return Err(ValidationError::MissingCredentials(self.name.clone()));
        }
        Ok(())
    }

    /// Storage key for this record
    #[must_use]
    pub fn storage_key(&self) -> String {
        Self::key_for(&self.name)
    }

    /// Storage key for a host name
    #[must_use]
    pub fn key_for(name: &str) -> String {
        format!("{HOST_KEY_PREFIX}{name}")
    }

    /// `address:port` endpoint string
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Copy of this record with the password masked, for display
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.password.is_some() {
            copy.password = Some("****".to_string());
        }
        copy
    }
}
