//! Calendar entry type shared by the server and client.
//!
//! A [`CalendarEntry`] is a plain value: two entries are the same entry
//! exactly when all of their fields are equal. The sync protocol relies on
//! this for addressing (modify and remove commands carry the full entry they
//! target rather than an identifier).

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A single entry in a user's calendar.
///
/// Entries carry no identifier. Equality is structural over all five fields,
/// so editing any field produces a different entry as far as the protocol is
/// concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    /// The day the entry is scheduled on.
    pub date: NaiveDate,
    /// When the entry starts.
    pub start_time: NaiveTime,
    /// When the entry ends.
    pub end_time: NaiveTime,
    /// Short title shown in listings.
    pub name: String,
    /// Free-form details. May be empty.
    pub description: String,
}

impl CalendarEntry {
    /// Creates a new entry.
    pub fn new(
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            date,
            start_time,
            end_time,
            name: name.into(),
            description: description.into(),
        }
    }

    /// Returns the scheduled length of the entry in minutes.
    ///
    /// Negative if the end time precedes the start time; the protocol does
    /// not reject such entries, clients are free to warn about them.
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

impl fmt::Display for CalendarEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{} {}",
            self.date,
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M"),
            self.name
        )?;
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}
