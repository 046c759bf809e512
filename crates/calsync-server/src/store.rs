//! Per-user calendar persistence.

use std::path::PathBuf;

use calsync_core::CalendarEntry;
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};

/// Stores one calendar per user.
///
/// A calendar is saved as a whole; there are no partial updates. Sessions
/// load at login and save once at teardown.
pub trait EntryStore: Send + Sync {
    /// Loads a user's calendar. A user with no stored data has an empty one.
    fn load(&self, username: &str) -> ServerResult<Vec<CalendarEntry>>;

    /// Saves a user's calendar, replacing any previous data.
    fn save(&self, username: &str, entries: &[CalendarEntry]) -> ServerResult<()>;

    /// Returns the names of all users with stored calendars, sorted.
    fn usernames(&self) -> ServerResult<Vec<String>>;

    /// Deletes a user's stored calendar. Returns false if there was none.
    fn delete(&self, username: &str) -> ServerResult<bool>;
}

/// Entry store keeping one JSON file per user.
pub struct JsonEntryStore {
    dir: PathBuf,
}

impl JsonEntryStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_path(&self, username: &str) -> PathBuf {
        self.dir.join(format!("{username}.json"))
    }
}

impl EntryStore for JsonEntryStore {
    fn load(&self, username: &str) -> ServerResult<Vec<CalendarEntry>> {
        let path = self.file_path(username);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(username = %username, "No stored calendar");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // The file is rewritten in full at the next save.
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Unreadable calendar file, starting empty"
                );
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, username: &str, entries: &[CalendarEntry]) -> ServerResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| ServerError::store(format!("failed to encode calendar: {}", e)))?;
        std::fs::write(self.file_path(username), json)?;
        Ok(())
    }

    fn usernames(&self) -> ServerResult<Vec<String>> {
        let dir = match std::fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in dir {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, username: &str) -> ServerResult<bool> {
        match std::fs::remove_file(self.file_path(username)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
