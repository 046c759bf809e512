//! Single-writer command dispatcher.
//!
//! Every calendar mutation in the process flows through one dispatcher
//! task, in arrival order. Sessions enqueue `(session, command)` pairs;
//! the dispatcher applies each command to the owning session's calendar
//! and writes the reply, so no two commands ever race on the same
//! calendar. A poison pill stops the task after everything queued before
//! it has been applied.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use calsync_core::CalendarEntry;
use calsync_protocol::{Command, CommandKind, ServerMessage};

use crate::error::{ServerError, ServerResult};
use crate::session::SessionState;

#[derive(Debug)]
enum QueueItem {
    Command {
        session: Arc<SessionState>,
        command: Command,
    },
    PoisonPill,
}

/// The dispatcher task. Create it, hand out [`DispatcherHandle`]s, then
/// spawn [`Dispatcher::run`].
pub struct Dispatcher {
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    queue_rx: Option<mpsc::UnboundedReceiver<QueueItem>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            queue_tx,
            queue_rx: Some(queue_rx),
        }
    }

    /// Returns a handle for enqueuing commands.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            queue_tx: self.queue_tx.clone(),
        }
    }

    /// Runs the dispatcher until a poison pill arrives.
    pub async fn run(mut self) {
        let mut queue_rx = self.queue_rx.take().expect("run called twice");
        info!("Dispatcher started");

        while let Some(item) = queue_rx.recv().await {
            match item {
                QueueItem::Command { session, command } => {
                    apply(session, command).await;
                }
                QueueItem::PoisonPill => {
                    info!("Dispatcher stopping");
                    break;
                }
            }
        }

        debug!("Dispatcher stopped");
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Clonable handle for submitting work to the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    queue_tx: mpsc::UnboundedSender<QueueItem>,
}

impl DispatcherHandle {
    /// Enqueues a command against a session's calendar. Returns false if
    /// the dispatcher has stopped.
    pub fn submit(&self, session: Arc<SessionState>, command: Command) -> bool {
        self.queue_tx
            .send(QueueItem::Command { session, command })
            .is_ok()
    }

    /// Stops the dispatcher once everything queued before this call has
    /// been applied. Returns false if it already stopped.
    pub fn shutdown(&self) -> bool {
        self.queue_tx.send(QueueItem::PoisonPill).is_ok()
    }
}

#[tracing::instrument(skip(session, command), fields(kind, username, duration_ms))]
async fn apply(session: Arc<SessionState>, command: Command) {
    let start = Instant::now();
    let kind = command.kind().to_string();
    let span = tracing::Span::current();
    span.record("kind", &kind);

    // Sessions only enqueue commands after login.
    let Some(username) = session.username() else {
        return;
    };
    span.record("username", username);

    let reply = {
        let mut entries = session.entries.lock().await;
        apply_to_entries(username, &mut entries, command)
    };

    match reply {
        Ok(Some(message)) => {
            if let Err(e) = session.send(&message).await {
                debug!(error = %e, "Failed to write reply, peer gone");
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!(username = %username, error = %e, "Command failed");
        }
    }

    let duration = start.elapsed();
    if tracing::enabled!(tracing::Level::DEBUG) {
        span.record("duration_ms", duration.as_millis());
        debug!(
            kind = %kind,
            duration_ms = duration.as_millis(),
            "Command applied"
        );
    }
}

/// Applies one command to a calendar, returning the reply to send, if any.
fn apply_to_entries(
    username: &str,
    entries: &mut Vec<CalendarEntry>,
    command: Command,
) -> ServerResult<Option<ServerMessage>> {
    match command.kind() {
        CommandKind::Noop => Ok(None),
        CommandKind::Heartbeat => Ok(Some(ServerMessage::echo(command))),
        CommandKind::RequestAll => Ok(Some(ServerMessage::snapshot(entries.clone()))),
        CommandKind::Add => {
            let (_, new_value) = command.into_values();
            if let Some(entry) = new_value {
                entries.push(entry);
            }
            Ok(None)
        }
        CommandKind::Remove => {
            let (old_value, _) = command.into_values();
            // Removing an entry that is not there is a no-op
            if let Some(target) = old_value
                && let Some(pos) = entries.iter().position(|e| *e == target)
            {
                entries.remove(pos);
            }
            Ok(None)
        }
        CommandKind::Modify => {
            let (old_value, new_value) = command.into_values();
            if let (Some(target), Some(replacement)) = (old_value, new_value) {
                match entries.iter().position(|e| *e == target) {
                    Some(pos) => entries[pos] = replacement,
                    None => return Err(ServerError::entry_not_found(username)),
                }
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use calsync_protocol::Envelope;

    fn entry(name: &str) -> CalendarEntry {
        CalendarEntry::new(
            NaiveDate::from_ymd_opt(2025, 2, 5).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            name,
            "Weekly sync",
        )
    }

    fn calendar(names: &[&str]) -> Vec<CalendarEntry> {
        names.iter().map(|name| entry(name)).collect()
    }

    #[test]
    fn noop_returns_no_reply() {
        let mut entries = calendar(&["Standup"]);
        let reply = apply_to_entries("alice", &mut entries, Command::noop()).unwrap();
        assert_eq!(reply, None);
        assert_eq!(entries, calendar(&["Standup"]));
    }

    #[test]
    fn heartbeat_echoes_back() {
        let mut entries = Vec::new();
        let reply = apply_to_entries("alice", &mut entries, Command::heartbeat()).unwrap();
        assert_eq!(reply, Some(ServerMessage::echo(Command::heartbeat())));
    }

    #[test]
    fn request_all_snapshots_current_entries() {
        let mut entries = calendar(&["Standup", "Retro"]);
        let reply = apply_to_entries("alice", &mut entries, Command::request_all()).unwrap();
        assert_eq!(reply, Some(ServerMessage::snapshot(entries.clone())));
    }

    #[test]
    fn add_appends_entry() {
        let mut entries = calendar(&["Standup"]);
        let reply =
            apply_to_entries("alice", &mut entries, Command::add(entry("Retro"))).unwrap();
        assert_eq!(reply, None);
        assert_eq!(entries, calendar(&["Standup", "Retro"]));
    }

    #[test]
    fn remove_deletes_first_match() {
        let mut entries = calendar(&["Standup", "Retro", "Standup"]);
        apply_to_entries("alice", &mut entries, Command::remove(entry("Standup"))).unwrap();
        assert_eq!(entries, calendar(&["Retro", "Standup"]));
    }

    #[test]
    fn remove_of_absent_entry_is_noop() {
        let mut entries = calendar(&["Standup"]);
        let reply =
            apply_to_entries("alice", &mut entries, Command::remove(entry("Retro"))).unwrap();
        assert_eq!(reply, None);
        assert_eq!(entries, calendar(&["Standup"]));
    }

    #[test]
    fn modify_replaces_in_place() {
        let mut entries = calendar(&["Standup", "Retro", "Planning"]);
        apply_to_entries(
            "alice",
            &mut entries,
            Command::modify(entry("Retro"), entry("Review")),
        )
        .unwrap();
        assert_eq!(entries, calendar(&["Standup", "Review", "Planning"]));
    }

    #[test]
    fn modify_of_absent_entry_fails_without_mutation() {
        let mut entries = calendar(&["Standup"]);
        let result = apply_to_entries(
            "alice",
            &mut entries,
            Command::modify(entry("Retro"), entry("Review")),
        );
        assert!(matches!(
            result,
            Err(ServerError::EntryNotFound { ref username }) if username == "alice"
        ));
        assert_eq!(entries, calendar(&["Standup"]));
    }

    /// A session state wired to a live socket pair.
    async fn connected_state() -> (Arc<SessionState>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (_, writer) = stream.into_split();
        (Arc::new(SessionState::new(1, peer, writer)), client)
    }

    async fn read_server(stream: &mut TcpStream) -> ServerMessage {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        let envelope: Envelope<ServerMessage> = serde_json::from_slice(&payload).unwrap();
        envelope.payload
    }

    #[tokio::test]
    async fn commands_apply_in_order_until_poison_pill() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let join = tokio::spawn(dispatcher.run());

        let (state, mut client) = connected_state().await;
        state.bind_username("alice");

        assert!(handle.submit(state.clone(), Command::add(entry("Standup"))));
        assert!(handle.submit(state.clone(), Command::request_all()));
        assert!(handle.shutdown());
        join.await.unwrap();

        assert_eq!(
            read_server(&mut client).await,
            ServerMessage::snapshot(vec![entry("Standup")])
        );
        assert_eq!(state.snapshot().await, vec![entry("Standup")]);
    }

    #[tokio::test]
    async fn commands_after_poison_pill_are_dropped() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();

        let (state, _client) = connected_state().await;
        state.bind_username("alice");

        assert!(handle.submit(state.clone(), Command::add(entry("Standup"))));
        assert!(handle.shutdown());
        // The queue is still open, so the late submit is accepted. It
        // must never be applied.
        assert!(handle.submit(state.clone(), Command::add(entry("Retro"))));

        dispatcher.run().await;
        assert_eq!(state.snapshot().await, vec![entry("Standup")]);
    }

    #[tokio::test]
    async fn interleaved_sessions_keep_separate_calendars() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let join = tokio::spawn(dispatcher.run());

        let (alice, mut alice_peer) = connected_state().await;
        alice.bind_username("alice");
        let (bob, mut bob_peer) = connected_state().await;
        bob.bind_username("bob");

        assert!(handle.submit(alice.clone(), Command::add(entry("Standup"))));
        assert!(handle.submit(bob.clone(), Command::add(entry("Planning"))));
        assert!(handle.submit(alice.clone(), Command::request_all()));
        assert!(handle.submit(bob.clone(), Command::request_all()));
        assert!(handle.shutdown());
        join.await.unwrap();

        assert_eq!(
            read_server(&mut alice_peer).await,
            ServerMessage::snapshot(vec![entry("Standup")])
        );
        assert_eq!(
            read_server(&mut bob_peer).await,
            ServerMessage::snapshot(vec![entry("Planning")])
        );
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let join = tokio::spawn(dispatcher.run());

        assert!(handle.shutdown());
        join.await.unwrap();

        let (state, _client) = connected_state().await;
        state.bind_username("alice");
        assert!(!handle.submit(state, Command::heartbeat()));
    }

    #[tokio::test]
    async fn unauthenticated_commands_are_ignored() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let join = tokio::spawn(dispatcher.run());

        let (state, _client) = connected_state().await;
        assert!(handle.submit(state.clone(), Command::add(entry("Standup"))));
        assert!(handle.shutdown());
        join.await.unwrap();

        assert!(state.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn lost_peer_does_not_stop_the_dispatcher() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        let join = tokio::spawn(dispatcher.run());

        let (state, client) = connected_state().await;
        state.bind_username("alice");
        drop(client);

        assert!(handle.submit(state.clone(), Command::request_all()));
        assert!(handle.submit(state.clone(), Command::add(entry("Standup"))));
        assert!(handle.shutdown());
        join.await.unwrap();

        assert_eq!(state.snapshot().await, vec![entry("Standup")]);
    }
}
