//! Credential storage and verification.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};

/// Checks and manages username/secret pairs.
///
/// Lookups are infallible, so a missing account and a wrong secret are
/// indistinguishable to callers. Mutations touch backing storage and can
/// fail.
pub trait CredentialStore: Send + Sync {
    /// Returns true if an account with this name exists.
    fn exists(&self, username: &str) -> bool;

    /// Returns true if the username/secret pair matches a stored account.
    fn authenticate(&self, username: &str, secret: &str) -> bool;

    /// Adds an account. Returns false if the name is already taken.
    fn add(&self, username: &str, secret: &str) -> ServerResult<bool>;

    /// Removes an account. Returns false if no such account exists.
    fn remove(&self, username: &str) -> ServerResult<bool>;

    /// Returns all account names, sorted.
    fn list_all(&self) -> Vec<String>;
}

/// Returns true if `name` is usable as an account name.
///
/// Names become file names in the entry store, so only a conservative
/// character set is allowed.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Credential store backed by a JSON file.
///
/// The whole table lives in memory and is rewritten on every mutation.
pub struct FileCredentialStore {
    path: PathBuf,
    table: RwLock<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    /// Loads the store at `path`, starting empty if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let table = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ServerError::credentials(format!("failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No credentials file, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    fn persist(&self, table: &BTreeMap<String, String>) -> ServerResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(table)
            .map_err(|e| ServerError::credentials(format!("failed to encode table: {}", e)))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn read_table(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.table.read().expect("credential table lock poisoned")
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.table.write().expect("credential table lock poisoned")
    }
}

impl CredentialStore for FileCredentialStore {
    fn exists(&self, username: &str) -> bool {
        self.read_table().contains_key(username)
    }

    fn authenticate(&self, username: &str, secret: &str) -> bool {
        self.read_table()
            .get(username)
            .is_some_and(|stored| stored == secret)
    }

    fn add(&self, username: &str, secret: &str) -> ServerResult<bool> {
        let mut table = self.write_table();
        if table.contains_key(username) {
            return Ok(false);
        }
        table.insert(username.to_string(), secret.to_string());
        if let Err(e) = self.persist(&table) {
            // Roll back so memory matches disk.
            table.remove(username);
            return Err(e);
        }
        info!(username = %username, "Account created");
        Ok(true)
    }

    fn remove(&self, username: &str) -> ServerResult<bool> {
        let mut table = self.write_table();
        let Some(secret) = table.remove(username) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&table) {
            // Roll back so memory matches disk.
            table.insert(username.to_string(), secret);
            return Err(e);
        }
        info!(username = %username, "Account removed");
        Ok(true)
    }

    fn list_all(&self) -> Vec<String> {
        self.read_table().keys().cloned().collect()
    }
}
