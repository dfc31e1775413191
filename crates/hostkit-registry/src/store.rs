//! Ordered key-value store on top of SQLite
//!
//! Keys and values are opaque byte strings. Keys are stored as BLOBs so the
//! primary key index orders them bytewise, which makes prefix scans return
//! entries in lexicographic key order.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, params};
use tracing::{debug, info, instrument, warn};

use crate::error::RegistryError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   BLOB PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
) WITHOUT ROWID;";

/// Durable ordered key-value store
pub struct KvStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl KvStore {
    /// Open or create the store at `path`
    ///
    /// A corrupted database file triggers one recovery attempt: the file is
    /// moved aside, a fresh store is created in its place and every row that
    /// can still be read is copied over.
    ///
    /// # Errors
    /// Returns `RegistryError::Corrupted` if recovery fails, or the
    /// underlying storage error for any other open failure
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(RegistryError::InvalidPath("empty path".to_string()));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = match Self::open_checked(path) {
            Ok(conn) => conn,
            Err(e) if is_corruption(&e) => {
                warn!(error = %e, "store is corrupted, attempting recovery");
                recover(path).map_err(|reason| RegistryError::Corrupted {
                    path: path.to_path_buf(),
                    reason,
                })?
            }
            Err(e) => return Err(e.into()),
        };

        debug!("opened host store");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a store that lives only in memory
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` if SQLite cannot allocate the database
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path: None })
    }

    fn open_checked(path: &Path) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(path)?;
        integrity_check(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Path of the database file, `None` for in-memory stores
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `key` is present
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` on query failure
    pub fn has(&self, key: &[u8]) -> Result<bool, RegistryError> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or overwrite `key`
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` on write failure
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), RegistryError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Value stored under `key`, if any
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` on query failure
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, RegistryError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Remove `key`; removing an absent key is not an error
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` on write failure
    pub fn delete(&self, key: &[u8]) -> Result<(), RegistryError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// All entries whose key starts with `prefix`, in key order
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` on query failure
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, RegistryError> {
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        };

        let entries = match prefix_upper_bound(prefix) {
            Some(upper) => {
                let mut stmt = self.conn.prepare(
                    "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key",
                )?;
                let rows = stmt
                    .query_map(params![prefix, upper], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")?;
                let rows = stmt
                    .query_map(params![prefix], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(entries)
    }

    /// Release the store handle
    ///
    /// # Errors
    /// Returns `RegistryError::Storage` if SQLite fails to close cleanly
    pub fn close(self) -> Result<(), RegistryError> {
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| RegistryError::Storage(e))?;
        debug!(path = ?path, "closed host store");
        Ok(())
    }
}

/// Smallest key greater than every key starting with `prefix`
///
/// Returns `None` when no such bound exists (empty prefix or all `0xFF`).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

/// Run `PRAGMA quick_check`, mapping a failed check to a corruption error
fn integrity_check(conn: &Connection) -> Result<(), rusqlite::Error> {
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if verdict == "ok" {
        Ok(())
    } else {
        Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            Some(verdict),
        ))
    }
}

fn recover(path: &Path) -> Result<Connection, String> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hosts.db".to_string());
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let backup = path.with_file_name(format!("{file_name}.corrupt-{stamp}"));

    fs::rename(path, &backup).map_err(|e| format!("failed to move corrupted store: {e}"))?;

    let conn = KvStore::open_checked(path).map_err(|e| e.to_string())?;
    let salvaged = salvage(&backup, &conn);

    info!(
        backup = %backup.display(),
        salvaged,
        "recovered host store"
    );

    Ok(conn)
}

/// Copy every readable row from `from` into `into`, stopping at the first
/// unreadable one
fn salvage(from: &Path, into: &Connection) -> usize {
    let Ok(old) = Connection::open_with_flags(from, OpenFlags::SQLITE_OPEN_READ_ONLY) else {
        return 0;
    };
    let Ok(mut stmt) = old.prepare("SELECT key, value FROM kv") else {
        return 0;
    };
    let Ok(rows) = stmt.query_map([], |row| {
        Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
    }) else {
        return 0;
    };

    let mut count = 0;
    for row in rows {
        let Ok((key, value)) = row else { break };
        if into
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .is_ok()
        {
            count += 1;
        }
    }
    count
}
