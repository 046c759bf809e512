//! Daemon: sessions, dispatcher, persistence.
//!
//! This crate provides the calsync server daemon that handles:
//! - TCP sessions with per-connection authentication
//! - A single dispatcher applying calendar commands in arrival order
//! - JSON persistence of user calendars, one file per user
//! - An interactive admin console
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use calsync_server::{FileCredentialStore, JsonEntryStore, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let credentials = Arc::new(FileCredentialStore::load(config.credentials_path.clone())?);
//!     let entry_store = Arc::new(JsonEntryStore::new(config.entries_dir()));
//!     let server = Server::bind(config, credentials, entry_store).await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

mod auth;
mod config;
mod console;
mod dispatch;
mod error;
mod registry;
mod server;
mod session;
mod signals;
mod store;

pub use auth::{CredentialStore, FileCredentialStore, is_valid_username};
pub use config::{DEFAULT_PORT, ServerConfig, default_bind_addr, default_data_dir};
pub use console::run_console;
pub use dispatch::{Dispatcher, DispatcherHandle};
pub use error::{ServerError, ServerResult};
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::{Session, SessionState};
pub use signals::{ShutdownSignal, SignalHandler};
pub use store::{EntryStore, JsonEntryStore};
