//! Command-line interface definition.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};

use calsync_core::CalendarEntry;

/// calsync - your calendar, synchronized
#[derive(Debug, Parser)]
#[command(name = "calsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Server address
    #[arg(long, env = "CALSYNC_ADDR", default_value_t = calsync_server::default_bind_addr())]
    pub addr: SocketAddr,

    /// Username to authenticate as
    #[arg(long, short, env = "CALSYNC_USER")]
    pub user: String,

    /// Secret to authenticate with
    #[arg(long, env = "CALSYNC_SECRET")]
    pub secret: String,

    /// Connection timeout in seconds
    #[arg(long, default_value = "5")]
    pub timeout: u64,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Returns the connection timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a calendar entry
    Add {
        #[command(flatten)]
        entry: EntryArgs,
    },

    /// Remove a calendar entry (matched field by field)
    Remove {
        #[command(flatten)]
        entry: EntryArgs,
    },

    /// Replace a calendar entry, keeping fields that are not overridden
    Modify {
        #[command(flatten)]
        old: EntryArgs,

        /// New date, defaults to the old one
        #[arg(long, value_parser = parse_date)]
        new_date: Option<NaiveDate>,

        /// New start time, defaults to the old one
        #[arg(long, value_parser = parse_time)]
        new_start: Option<NaiveTime>,

        /// New end time, defaults to the old one
        #[arg(long, value_parser = parse_time)]
        new_end: Option<NaiveTime>,

        /// New name, defaults to the old one
        #[arg(long)]
        new_name: Option<String>,

        /// New description, defaults to the old one
        #[arg(long)]
        new_description: Option<String>,
    },

    /// List the calendar
    List,

    /// Check that the server answers heartbeats
    Ping,
}

/// Fields identifying a calendar entry.
#[derive(Debug, Args)]
pub struct EntryArgs {
    /// Date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub date: NaiveDate,

    /// Start time (HH:MM or HH:MM:SS)
    #[arg(long, value_parser = parse_time)]
    pub start: NaiveTime,

    /// End time (HH:MM or HH:MM:SS)
    #[arg(long, value_parser = parse_time)]
    pub end: NaiveTime,

    /// Entry name
    #[arg(long)]
    pub name: String,

    /// Free-form description
    #[arg(long, default_value = "")]
    pub description: String,
}

impl EntryArgs {
    /// Builds the calendar entry these arguments describe.
    pub fn to_entry(&self) -> CalendarEntry {
        CalendarEntry::new(
            self.date,
            self.start,
            self.end,
            self.name.clone(),
            self.description.clone(),
        )
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date '{}': {}", s, e))
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| format!("invalid time '{}': {}", s, e))
}
