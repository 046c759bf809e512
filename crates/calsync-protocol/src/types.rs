//! Client and server message types for the calsync protocol.

use calsync_core::CalendarEntry;
use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;
use crate::command::Command;

/// Message envelope wrapping all protocol messages.
///
/// Every message exchanged between client and server is wrapped in this
/// envelope, which carries the protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol version (always "1" for v1).
    pub protocol_version: String,
    /// The actual payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with the current protocol version.
    pub fn new(payload: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            payload,
        }
    }

    /// Returns the protocol version.
    pub fn version(&self) -> &str {
        &self.protocol_version
    }

    /// Checks if this envelope uses a compatible protocol version.
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection with a username/secret pair.
    Login {
        /// Account name.
        username: String,
        /// Shared secret for the account.
        secret: String,
    },

    /// A calendar command to enqueue for dispatch.
    Command {
        /// The command to execute.
        command: Command,
    },
}

impl ClientMessage {
    /// Creates a Login message.
    pub fn login(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::Login {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Creates a Command message.
    pub fn command(command: Command) -> Self {
        Self::Command { command }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Outcome of a Login attempt.
    LoginResult {
        /// True if the credentials were accepted.
        accepted: bool,
    },

    /// Full copy of the issuer's calendar.
    Snapshot {
        /// All entries, in calendar order.
        entries: Vec<CalendarEntry>,
    },

    /// A command echoed back to its issuer.
    Echo {
        /// The command as the server saw it.
        command: Command,
    },
}

impl ServerMessage {
    /// Creates a LoginResult message.
    pub fn login_result(accepted: bool) -> Self {
        Self::LoginResult { accepted }
    }

    /// Creates a Snapshot message.
    pub fn snapshot(entries: Vec<CalendarEntry>) -> Self {
        Self::Snapshot { entries }
    }

    /// Creates an Echo message.
    pub fn echo(command: Command) -> Self {
        Self::Echo { command }
    }
}
