//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 27999;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,

    /// Directory holding per-user calendar data.
    pub data_dir: PathBuf,

    /// Path to the credentials file.
    pub credentials_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            bind_addr: default_bind_addr(),
            credentials_path: data_dir.join("users.json"),
            data_dir,
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration with the given data directory.
    ///
    /// The credentials file defaults to `users.json` inside that directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            bind_addr: default_bind_addr(),
            credentials_path: data_dir.join("users.json"),
            data_dir,
        }
    }

    /// Builder: set the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Builder: set the credentials file path.
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    /// Returns the directory holding stored calendars.
    pub fn entries_dir(&self) -> PathBuf {
        self.data_dir.join("entries")
    }
}

/// Returns the default bind address (loopback, port 27999).
pub fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

/// Returns the default data directory.
///
/// Uses the platform data directory (e.g. `~/.local/share/calsync`),
/// falling back to `.calsync` in the working directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("calsync"))
        .unwrap_or_else(|| PathBuf::from(".calsync"))
}
