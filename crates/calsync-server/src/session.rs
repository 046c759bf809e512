//! Per-connection client sessions.
//!
//! A session owns one TCP connection and moves through a one-way
//! authentication sequence: it starts unauthenticated, accepts a login,
//! and from then on forwards calendar commands to the dispatcher. The
//! session task is the only reader of its socket; replies are written
//! through [`SessionState`], which the dispatcher shares.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use calsync_core::CalendarEntry;
use calsync_protocol::{
    ClientMessage, Command, Envelope, MAX_MESSAGE_SIZE, PROTOCOL_VERSION, ProtocolError,
    ServerMessage, encode_message,
};

use crate::auth::CredentialStore;
use crate::dispatch::DispatcherHandle;
use crate::error::{ServerError, ServerResult};
use crate::store::EntryStore;

/// Authentication sequence of a session. The transition is one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    /// Connected, credentials not yet accepted.
    Authenticating,
    /// Credentials accepted, commands flow to the dispatcher.
    Authenticated,
}

/// State shared between a session task, the dispatcher, and the registry.
#[derive(Debug)]
pub struct SessionState {
    id: u64,
    peer: SocketAddr,
    username: OnceLock<String>,
    /// The session's in-memory calendar. Only the dispatcher mutates it.
    pub(crate) entries: Mutex<Vec<CalendarEntry>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl SessionState {
    pub(crate) fn new(id: u64, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            username: OnceLock::new(),
            entries: Mutex::new(Vec::new()),
            writer: Mutex::new(writer),
        }
    }

    /// Returns the session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the username, once authenticated.
    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    /// Returns the username once authenticated, the peer address before.
    pub fn identification(&self) -> String {
        match self.username() {
            Some(username) => username.to_string(),
            None => self.peer.to_string(),
        }
    }

    /// Sends a message to the client, framed and enveloped.
    pub async fn send(&self, message: &ServerMessage) -> ServerResult<()> {
        let bytes = encode_message(&Envelope::new(message))?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Returns a copy of the session's calendar.
    pub async fn snapshot(&self) -> Vec<CalendarEntry> {
        self.entries.lock().await.clone()
    }

    pub(crate) fn bind_username(&self, username: &str) {
        let _ = self.username.set(username.to_string());
    }

    async fn shutdown_writer(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// A single client connection, from accept to teardown.
pub struct Session {
    shared: Arc<SessionState>,
    reader: OwnedReadHalf,
    auth: AuthState,
    credentials: Arc<dyn CredentialStore>,
    entry_store: Arc<dyn EntryStore>,
    dispatcher: DispatcherHandle,
    kick_rx: watch::Receiver<bool>,
    departure_tx: mpsc::UnboundedSender<u64>,
}

impl Session {
    /// Creates a session for an accepted connection.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        peer: SocketAddr,
        stream: TcpStream,
        credentials: Arc<dyn CredentialStore>,
        entry_store: Arc<dyn EntryStore>,
        dispatcher: DispatcherHandle,
        kick_rx: watch::Receiver<bool>,
        departure_tx: mpsc::UnboundedSender<u64>,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            shared: Arc::new(SessionState::new(id, peer, writer)),
            reader,
            auth: AuthState::Authenticating,
            credentials,
            entry_store,
            dispatcher,
            kick_rx,
            departure_tx,
        }
    }

    /// Returns the shared state of this session.
    pub fn state(&self) -> Arc<SessionState> {
        self.shared.clone()
    }

    /// Runs the session until the client disconnects, a fatal frame error
    /// occurs, or the session is kicked. Always tears down: an
    /// authenticated session persists its calendar exactly once.
    pub async fn run(mut self) {
        debug!(
            session_id = self.shared.id(),
            peer = %self.shared.peer(),
            "Session started"
        );

        loop {
            tokio::select! {
                changed = self.kick_rx.changed() => {
                    if changed.is_err() || *self.kick_rx.borrow() {
                        info!(
                            session_id = self.shared.id(),
                            identification = %self.shared.identification(),
                            "Session kicked"
                        );
                        break;
                    }
                }
                frame = read_frame(&mut self.reader) => {
                    match frame {
                        Ok(Some(payload)) => {
                            if let Err(e) = self.handle_frame(payload).await {
                                warn!(error = %e, "Failed to write to client");
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(session_id = self.shared.id(), "Client disconnected");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Error reading message");
                            break;
                        }
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Decodes one frame payload and feeds it to the state machine.
    ///
    /// Undecodable payloads, incompatible versions and out-of-state
    /// messages are discarded; the connection stays open. Only a failed
    /// reply write surfaces as an error.
    async fn handle_frame(&mut self, payload: Vec<u8>) -> ServerResult<()> {
        let envelope: Envelope<ClientMessage> = match serde_json::from_slice(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Discarding undecodable message");
                return Ok(());
            }
        };

        if !envelope.is_compatible() {
            warn!(
                version = %envelope.protocol_version,
                expected = %PROTOCOL_VERSION,
                "Discarding message with incompatible protocol version"
            );
            return Ok(());
        }

        match (self.auth, envelope.payload) {
            (AuthState::Authenticating, ClientMessage::Login { username, secret }) => {
                self.handle_login(&username, &secret).await
            }
            (AuthState::Authenticating, ClientMessage::Command { .. }) => {
                debug!("Discarding command from unauthenticated session");
                Ok(())
            }
            (AuthState::Authenticated, ClientMessage::Command { command }) => {
                self.handle_command(command);
                Ok(())
            }
            (AuthState::Authenticated, ClientMessage::Login { .. }) => {
                warn!(
                    username = self.shared.username().unwrap_or_default(),
                    "Discarding login on authenticated session"
                );
                Ok(())
            }
        }
    }

    async fn handle_login(&mut self, username: &str, secret: &str) -> ServerResult<()> {
        let accepted = self.credentials.authenticate(username, secret);

        if accepted {
            self.shared.bind_username(username);
            let entries = match self.entry_store.load(username) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        username = %username,
                        error = %e,
                        "Failed to load calendar, starting empty"
                    );
                    Vec::new()
                }
            };
            let count = entries.len();
            *self.shared.entries.lock().await = entries;
            self.auth = AuthState::Authenticated;
            info!(username = %username, entries = count, "Login accepted");
        } else {
            // The client may retry with other credentials.
            info!(username = %username, "Login rejected");
        }

        self.shared.send(&ServerMessage::login_result(accepted)).await
    }

    fn handle_command(&self, command: Command) {
        if command.is_heartbeat() {
            debug!(
                username = self.shared.username().unwrap_or_default(),
                "Heartbeat received"
            );
        } else {
            info!(
                username = self.shared.username().unwrap_or_default(),
                kind = %command.kind(),
                "Command received"
            );
        }

        if !self.dispatcher.submit(self.shared.clone(), command) {
            warn!("Dispatcher is gone, dropping command");
        }
    }

    async fn teardown(self) {
        if let Some(username) = self.shared.username() {
            let entries = self.shared.snapshot().await;
            match self.entry_store.save(username, &entries) {
                Ok(()) => {
                    info!(username = %username, entries = entries.len(), "Calendar saved");
                }
                Err(e) => {
                    error!(username = %username, error = %e, "Failed to save calendar");
                }
            }
        }

        self.shared.shutdown_writer().await;

        if self.departure_tx.send(self.shared.id()).is_err() {
            debug!("Departure channel closed");
        }

        debug!(
            session_id = self.shared.id(),
            identification = %self.shared.identification(),
            "Session ended"
        );
    }
}

/// Reads one length-prefixed frame, returning the raw payload.
///
/// Returns `Ok(None)` if the peer closed the connection cleanly. There is
/// no read deadline; an idle client stays connected until it disconnects
/// or is kicked.
async fn read_frame(reader: &mut OwnedReadHalf) -> ServerResult<Option<Vec<u8>>> {
    // Read length prefix (4 bytes, big-endian)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE as usize {
        return Err(ServerError::Protocol(ProtocolError::MessageTooLarge {
            size: len as u32,
            max: MAX_MESSAGE_SIZE,
        }));
    }

    if len == 0 {
        return Err(ServerError::Protocol(ProtocolError::EmptyMessage));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::{NaiveDate, NaiveTime};
    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::auth::FileCredentialStore;
    use crate::dispatch::Dispatcher;
    use crate::store::JsonEntryStore;

    fn entry(name: &str) -> CalendarEntry {
        CalendarEntry::new(
            NaiveDate::from_ymd_opt(2025, 2, 5).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            name,
            "Weekly sync",
        )
    }

    async fn send_client(stream: &mut TcpStream, message: &ClientMessage) {
        let bytes = encode_message(&Envelope::new(message)).unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    async fn read_server(stream: &mut TcpStream) -> ServerMessage {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        let envelope: Envelope<ServerMessage> = serde_json::from_slice(&payload).unwrap();
        envelope.payload
    }

    struct Harness {
        client: TcpStream,
        state: Arc<SessionState>,
        entry_store: Arc<JsonEntryStore>,
        departures: mpsc::UnboundedReceiver<u64>,
        kick_tx: watch::Sender<bool>,
        join: JoinHandle<()>,
    }

    /// Starts one session with "alice"/"wonderland" registered.
    async fn start_session(dir: &Path) -> Harness {
        let credentials = Arc::new(FileCredentialStore::load(dir.join("users.json")).unwrap());
        credentials.add("alice", "wonderland").unwrap();
        let entry_store = Arc::new(JsonEntryStore::new(dir.join("entries")));

        let dispatcher = Dispatcher::new();
        let dispatcher_handle = dispatcher.handle();
        tokio::spawn(dispatcher.run());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        let (kick_tx, kick_rx) = watch::channel(false);
        let (departure_tx, departures) = mpsc::unbounded_channel();

        let session = Session::new(
            1,
            peer,
            stream,
            credentials,
            entry_store.clone(),
            dispatcher_handle,
            kick_rx,
            departure_tx,
        );
        let state = session.state();
        let join = tokio::spawn(session.run());

        Harness {
            client,
            state,
            entry_store,
            departures,
            kick_tx,
            join,
        }
    }

    #[tokio::test]
    async fn login_reject_then_accept() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        send_client(&mut h.client, &ClientMessage::login("alice", "hatter")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(false)
        );
        assert_eq!(h.state.username(), None);

        // A failed attempt leaves the session open for a retry
        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );
        assert_eq!(h.state.username(), Some("alice"));
    }

    #[tokio::test]
    async fn commands_before_login_are_discarded() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        send_client(
            &mut h.client,
            &ClientMessage::command(Command::add(entry("Standup"))),
        )
        .await;

        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );

        send_client(&mut h.client, &ClientMessage::command(Command::request_all())).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::snapshot(Vec::new())
        );
    }

    #[tokio::test]
    async fn commands_apply_in_arrival_order() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );

        send_client(
            &mut h.client,
            &ClientMessage::command(Command::add(entry("Standup"))),
        )
        .await;
        send_client(
            &mut h.client,
            &ClientMessage::command(Command::add(entry("Retro"))),
        )
        .await;
        send_client(&mut h.client, &ClientMessage::command(Command::request_all())).await;

        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::snapshot(vec![entry("Standup"), entry("Retro")])
        );
    }

    #[tokio::test]
    async fn second_login_is_discarded() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );

        // No reply for a login on an authenticated session
        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        send_client(&mut h.client, &ClientMessage::command(Command::heartbeat())).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::echo(Command::heartbeat())
        );
    }

    #[tokio::test]
    async fn malformed_payload_keeps_connection_open() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        let garbage = b"{not json";
        let mut frame = (garbage.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(garbage);
        h.client.write_all(&frame).await.unwrap();

        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );
    }

    #[tokio::test]
    async fn incompatible_version_is_discarded() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        // Would reply false if it were processed
        let envelope = Envelope {
            protocol_version: "0".to_string(),
            payload: ClientMessage::login("alice", "hatter"),
        };
        let bytes = encode_message(&envelope).unwrap();
        h.client.write_all(&bytes).await.unwrap();

        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );
    }

    #[tokio::test]
    async fn oversized_frame_ends_session() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        let len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        h.client.write_all(&len).await.unwrap();

        h.join.await.unwrap();
        assert_eq!(h.departures.recv().await, Some(1));

        let mut buf = [0u8; 1];
        let n = h.client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn zero_length_frame_ends_session() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        h.client.write_all(&0u32.to_be_bytes()).await.unwrap();

        h.join.await.unwrap();
        assert_eq!(h.departures.recv().await, Some(1));
    }

    #[tokio::test]
    async fn kick_closes_the_connection() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );

        h.kick_tx.send(true).unwrap();
        h.join.await.unwrap();
        assert_eq!(h.departures.recv().await, Some(1));

        let mut buf = [0u8; 1];
        let n = h.client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn teardown_persists_the_calendar() {
        let dir = tempdir().unwrap();
        let mut h = start_session(dir.path()).await;

        send_client(&mut h.client, &ClientMessage::login("alice", "wonderland")).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::login_result(true)
        );

        send_client(
            &mut h.client,
            &ClientMessage::command(Command::add(entry("Standup"))),
        )
        .await;
        send_client(
            &mut h.client,
            &ClientMessage::command(Command::add(entry("Retro"))),
        )
        .await;
        // The snapshot reply proves both adds were applied before we disconnect
        send_client(&mut h.client, &ClientMessage::command(Command::request_all())).await;
        assert_eq!(
            read_server(&mut h.client).await,
            ServerMessage::snapshot(vec![entry("Standup"), entry("Retro")])
        );

        drop(h.client);
        h.join.await.unwrap();
        assert_eq!(h.departures.recv().await, Some(1));

        assert_eq!(
            h.entry_store.load("alice").unwrap(),
            vec![entry("Standup"), entry("Retro")]
        );
    }

    #[tokio::test]
    async fn unauthenticated_teardown_saves_nothing() {
        let dir = tempdir().unwrap();
        let h = start_session(dir.path()).await;

        drop(h.client);
        h.join.await.unwrap();

        assert!(h.entry_store.usernames().unwrap().is_empty());
    }
}
