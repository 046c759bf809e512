//! Server error types.

use std::io;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] calsync_protocol::ProtocolError),

    /// Credential storage error.
    #[error("Credential store error: {message}")]
    Credentials { message: String },

    /// Entry storage error.
    #[error("Entry store error: {message}")]
    Store { message: String },

    /// An account with this name already exists.
    #[error("User already exists: {username}")]
    UserExists { username: String },

    /// No account with this name exists.
    #[error("No such user: {username}")]
    UnknownUser { username: String },

    /// A modify command addressed an entry that does not exist.
    #[error("No matching entry for user {username}")]
    EntryNotFound { username: String },
}

impl ServerError {
    /// Creates a credential store error.
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials {
            message: message.into(),
        }
    }

    /// Creates an entry store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a user exists error.
    pub fn user_exists(username: impl Into<String>) -> Self {
        Self::UserExists {
            username: username.into(),
        }
    }

    /// Creates an unknown user error.
    pub fn unknown_user(username: impl Into<String>) -> Self {
        Self::UnknownUser {
            username: username.into(),
        }
    }

    /// Creates an entry not found error.
    pub fn entry_not_found(username: impl Into<String>) -> Self {
        Self::EntryNotFound {
            username: username.into(),
        }
    }
}
