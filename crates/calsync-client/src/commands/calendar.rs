//! Calendar commands: add, remove, modify, list.
//!
//! Mutations produce no reply on the wire, so each command requests the
//! calendar back after sending. The returned snapshot confirms the server
//! applied the change before the connection closes.

use calsync_core::CalendarEntry;

use crate::client::Client;
use crate::error::ClientResult;

/// Adds an entry to the calendar.
pub async fn add(client: &mut Client, entry: CalendarEntry) -> ClientResult<()> {
    let name = entry.name.clone();
    client.add(entry).await?;
    let entries = client.request_all().await?;
    println!("Added '{}' ({} total)", name, entries.len());
    Ok(())
}

/// Removes an entry from the calendar.
///
/// The server treats removing an absent entry as a no-op, so the calendar
/// is checked first to give accurate feedback.
pub async fn remove(client: &mut Client, entry: CalendarEntry) -> ClientResult<()> {
    let before = client.request_all().await?;
    if !before.contains(&entry) {
        println!("No matching entry found");
        return Ok(());
    }

    let name = entry.name.clone();
    client.remove(entry).await?;
    let entries = client.request_all().await?;
    println!("Removed '{}' ({} total)", name, entries.len());
    Ok(())
}

/// Replaces an entry in the calendar.
pub async fn modify(
    client: &mut Client,
    old: CalendarEntry,
    new: CalendarEntry,
) -> ClientResult<()> {
    let before = client.request_all().await?;
    if !before.contains(&old) {
        println!("No matching entry found");
        return Ok(());
    }

    client.modify(old, new.clone()).await?;
    // Wait for the change to be applied before disconnecting
    client.request_all().await?;
    println!("Modified '{}'", new.name);
    Ok(())
}

/// Prints the calendar, one entry per line.
pub async fn list(client: &mut Client) -> ClientResult<()> {
    let entries = client.request_all().await?;
    if entries.is_empty() {
        println!("Calendar is empty");
        return Ok(());
    }
    for entry in entries {
        println!("{}", entry);
    }
    Ok(())
}
