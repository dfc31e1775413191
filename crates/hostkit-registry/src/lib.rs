//! hostkit-registry: Durable host inventory
//!
//! Stores `HostRecord`s in an embedded, ordered key-value store under the
//! `host.` namespace and provides CRUD, prefix-scoped listing and JSON
//! import/export.

pub mod error;
pub mod registry;
pub mod store;
pub mod transfer;

pub use error::RegistryError;
pub use registry::HostRegistry;
pub use store::KvStore;
pub use transfer::{ImportReport, export_hosts, import_hosts};
