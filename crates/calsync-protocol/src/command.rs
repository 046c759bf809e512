//! Calendar mutation commands.
//!
//! A [`Command`] pairs a [`CommandKind`] with up to two calendar entry
//! values. Which values must be present is fixed per kind and checked at
//! construction, so a decoded command is always well formed.

use calsync_core::CalendarEntry;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// The kind of operation a [`Command`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Does nothing when applied.
    Noop,
    /// Append a new entry to the issuer's calendar.
    Add,
    /// Remove an existing entry from the issuer's calendar.
    Remove,
    /// Replace an existing entry with an updated one.
    Modify,
    /// Request a full snapshot of the issuer's calendar.
    RequestAll,
    /// Liveness probe, echoed back to the issuer.
    Heartbeat,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Noop => "noop",
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Modify => "modify",
            Self::RequestAll => "request_all",
            Self::Heartbeat => "heartbeat",
        };
        f.write_str(name)
    }
}

/// A single calendar operation sent from a client to the server.
///
/// Entries are addressed by value: `old_value` identifies an existing entry
/// by structural equality, `new_value` carries the entry to store. The
/// kind/value pairing is validated in [`Command::new`] and re-validated on
/// deserialization, so an invalid combination never reaches the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CommandParts", into = "CommandParts")]
pub struct Command {
    kind: CommandKind,
    old_value: Option<CalendarEntry>,
    new_value: Option<CalendarEntry>,
}

impl Command {
    /// Creates a command, checking the kind/value pairing.
    ///
    /// `Add` takes only a new value, `Remove` only an old value, `Modify`
    /// both, `RequestAll` and `Heartbeat` neither. `Noop` accepts anything.
    pub fn new(
        kind: CommandKind,
        old_value: Option<CalendarEntry>,
        new_value: Option<CalendarEntry>,
    ) -> ProtocolResult<Self> {
        let valid = match kind {
            CommandKind::Noop => true,
            CommandKind::Add => old_value.is_none() && new_value.is_some(),
            CommandKind::Remove => old_value.is_some() && new_value.is_none(),
            CommandKind::Modify => old_value.is_some() && new_value.is_some(),
            CommandKind::RequestAll | CommandKind::Heartbeat => {
                old_value.is_none() && new_value.is_none()
            }
        };

        if !valid {
            return Err(ProtocolError::InvalidCommand {
                kind,
                expected: expected_values(kind),
            });
        }

        Ok(Self {
            kind,
            old_value,
            new_value,
        })
    }

    /// Creates a no-op command.
    pub fn noop() -> Self {
        Self {
            kind: CommandKind::Noop,
            old_value: None,
            new_value: None,
        }
    }

    /// Creates a command that appends `entry` to the issuer's calendar.
    pub fn add(entry: CalendarEntry) -> Self {
        Self {
            kind: CommandKind::Add,
            old_value: None,
            new_value: Some(entry),
        }
    }

    /// Creates a command that removes the entry equal to `entry`.
    pub fn remove(entry: CalendarEntry) -> Self {
        Self {
            kind: CommandKind::Remove,
            old_value: Some(entry),
            new_value: None,
        }
    }

    /// Creates a command that replaces the entry equal to `old` with `new`.
    pub fn modify(old: CalendarEntry, new: CalendarEntry) -> Self {
        Self {
            kind: CommandKind::Modify,
            old_value: Some(old),
            new_value: Some(new),
        }
    }

    /// Creates a command requesting a full calendar snapshot.
    pub fn request_all() -> Self {
        Self {
            kind: CommandKind::RequestAll,
            old_value: None,
            new_value: None,
        }
    }

    /// Creates a heartbeat command.
    pub fn heartbeat() -> Self {
        Self {
            kind: CommandKind::Heartbeat,
            old_value: None,
            new_value: None,
        }
    }

    /// Returns the command kind.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Returns the entry this command addresses, if any.
    pub fn old_value(&self) -> Option<&CalendarEntry> {
        self.old_value.as_ref()
    }

    /// Returns the entry this command carries, if any.
    pub fn new_value(&self) -> Option<&CalendarEntry> {
        self.new_value.as_ref()
    }

    /// Returns true if this is a heartbeat command.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == CommandKind::Heartbeat
    }

    /// Consumes the command, returning its old and new values.
    pub fn into_values(self) -> (Option<CalendarEntry>, Option<CalendarEntry>) {
        (self.old_value, self.new_value)
    }
}

fn expected_values(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Noop => "any values",
        CommandKind::Add => "a new value and no old value",
        CommandKind::Remove => "an old value and no new value",
        CommandKind::Modify => "both an old and a new value",
        CommandKind::RequestAll | CommandKind::Heartbeat => "no values",
    }
}

/// Wire shape of a [`Command`], without the pairing check.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandParts {
    kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_value: Option<CalendarEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_value: Option<CalendarEntry>,
}

impl From<Command> for CommandParts {
    fn from(command: Command) -> Self {
        Self {
            kind: command.kind,
            old_value: command.old_value,
            new_value: command.new_value,
        }
    }
}

impl TryFrom<CommandParts> for Command {
    type Error = ProtocolError;

    fn try_from(parts: CommandParts) -> Result<Self, Self::Error> {
        Command::new(parts.kind, parts.old_value, parts.new_value)
    }
}
