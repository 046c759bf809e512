//! Golden tests for the wire format.
//!
//! These tests use insta inline snapshots to pin the exact JSON layout of
//! protocol messages. Run with `cargo insta review` to update snapshots
//! after intentional changes.

use calsync_core::CalendarEntry;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::{ClientMessage, Command, Envelope, ServerMessage};

/// Create a fixed sample entry so snapshots stay stable.
fn sample_entry() -> CalendarEntry {
    CalendarEntry::new(
        NaiveDate::from_ymd_opt(2025, 2, 5).unwrap(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
        "Team Standup",
        "Weekly sync",
    )
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap()
}

#[test]
fn login_envelope() {
    let envelope = Envelope::new(ClientMessage::login("alice", "wonderland"));
    insta::assert_snapshot!(pretty(&envelope), @r#"
    {
      "protocol_version": "1",
      "payload": {
        "type": "login",
        "username": "alice",
        "secret": "wonderland"
      }
    }
    "#);
}

#[test]
fn add_command_envelope() {
    let envelope = Envelope::new(ClientMessage::command(Command::add(sample_entry())));
    insta::assert_snapshot!(pretty(&envelope), @r#"
    {
      "protocol_version": "1",
      "payload": {
        "type": "command",
        "command": {
          "kind": "add",
          "new_value": {
            "date": "2025-02-05",
            "start_time": "10:00:00",
            "end_time": "10:30:00",
            "name": "Team Standup",
            "description": "Weekly sync"
          }
        }
      }
    }
    "#);
}

#[test]
fn login_result_envelope() {
    let envelope = Envelope::new(ServerMessage::login_result(true));
    insta::assert_snapshot!(pretty(&envelope), @r#"
    {
      "protocol_version": "1",
      "payload": {
        "type": "login_result",
        "accepted": true
      }
    }
    "#);
}

#[test]
fn snapshot_envelope() {
    let envelope = Envelope::new(ServerMessage::snapshot(vec![sample_entry()]));
    insta::assert_snapshot!(pretty(&envelope), @r#"
    {
      "protocol_version": "1",
      "payload": {
        "type": "snapshot",
        "entries": [
          {
            "date": "2025-02-05",
            "start_time": "10:00:00",
            "end_time": "10:30:00",
            "name": "Team Standup",
            "description": "Weekly sync"
          }
        ]
      }
    }
    "#);
}

#[test]
fn echo_envelope() {
    let envelope = Envelope::new(ServerMessage::echo(Command::heartbeat()));
    insta::assert_snapshot!(pretty(&envelope), @r#"
    {
      "protocol_version": "1",
      "payload": {
        "type": "echo",
        "command": {
          "kind": "heartbeat"
        }
      }
    }
    "#);
}
