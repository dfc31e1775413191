//! Host registry on top of the key-value store

use std::path::Path;

use hostkit_types::{HOST_KEY_PREFIX, HostRecord};
use tracing::{debug, info, instrument, warn};

use crate::error::RegistryError;
use crate::store::KvStore;

/// CRUD and listing over `HostRecord`s
///
/// Each record is stored as JSON under `host.<name>`. The handle is opened
/// once per logical operation and released with [`HostRegistry::close`].
#[derive(Debug)]
pub struct HostRegistry {
    store: KvStore,
}

impl HostRegistry {
    /// Open the registry backed by the database file at `path`
    ///
    /// # Errors
    /// Returns `RegistryError` if the store cannot be opened or recovered
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let store = KvStore::open(path)?;
        if let Some(path) = store.path() {
            info!(path = %path.display(), "opened host registry");
        }
        Ok(Self { store })
    }

    /// Registry that lives only in memory
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` if the store cannot be created
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Ok(Self {
            store: KvStore::open_in_memory()?,
        })
    }

    /// Underlying key-value store
    #[must_use]
    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Store `host`, overwriting any record with the same name
    ///
    /// # Errors
    /// Returns `RegistryError::Validation` if the record has no name or no
    /// credentials; nothing is written in that case
    #[instrument(skip(self, host), fields(host = %host.name))]
    pub fn add(&self, host: &HostRecord) -> Result<(), RegistryError> {
        host.validate()?;

        let encoded = serde_json::to_vec(host)?;
        self.store.put(host.storage_key().as_bytes(), &encoded)?;

        debug!("saved host");
        Ok(())
    }

    /// Record stored under `name`
    ///
    /// # Errors
    /// Returns `RegistryError::NotFound` if no such host exists
    pub fn get(&self, name: &str) -> Result<HostRecord, RegistryError> {
        let value = self
            .store
            .get(HostRecord::key_for(name).as_bytes())?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        Ok(serde_json::from_slice(&value)?)
    }

    /// Whether a host named `name` exists
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` on store failure
    pub fn has(&self, name: &str) -> Result<bool, RegistryError> {
        self.store.has(HostRecord::key_for(name).as_bytes())
    }

    /// All stored hosts ordered by name
    ///
    /// Entries that fail to decode are skipped and logged.
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` if the scan itself fails
    pub fn list(&self) -> Result<Vec<HostRecord>, RegistryError> {
        self.list_with(|key, error| {
            warn!(key = %key, error = %error, "skipping undecodable host entry");
        })
    }

    /// Like [`HostRegistry::list`], reporting skipped entries to `on_skip`
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` if the scan itself fails
    pub fn list_with<F>(&self, mut on_skip: F) -> Result<Vec<HostRecord>, RegistryError>
    where
        F: FnMut(&str, &serde_json::Error),
    {
        let entries = self.store.scan_prefix(HOST_KEY_PREFIX.as_bytes())?;
        let mut hosts = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            match serde_json::from_slice::<HostRecord>(&value) {
                Ok(host) => hosts.push(host),
                Err(e) => on_skip(&String::from_utf8_lossy(&key), &e),
            }
        }

        Ok(hosts)
    }

    /// Overwrite an existing host
    ///
    /// # Errors
    /// Returns `RegistryError::NotFound` if the host does not exist, or the
    /// same errors as [`HostRegistry::add`]
    #[instrument(skip(self, host), fields(host = %host.name))]
    pub fn update(&self, host: &HostRecord) -> Result<(), RegistryError> {
        host.validate()?;

        if !self.has(&host.name)? {
            return Err(RegistryError::NotFound(host.name.clone()));
        }

        self.add(host)?;
        info!("updated host");
        Ok(())
    }

    /// Remove the host named `name`; removing an absent host succeeds
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` on store failure
    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        self.store.delete(HostRecord::key_for(name).as_bytes())?;
        debug!("deleted host");
        Ok(())
    }

    /// Release the underlying store handle
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` if the store fails to close
    pub fn close(self) -> Result<(), RegistryError> {
        self.store.close()
    }
}
