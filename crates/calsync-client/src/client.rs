//! TCP client for the calsync server.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use calsync_core::CalendarEntry;
use calsync_protocol::{
    ClientMessage, Command, Envelope, MAX_MESSAGE_SIZE, ServerMessage, encode_message,
};

use crate::error::{ClientError, ClientResult};

/// Interval at which long-lived clients send heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A connected client session.
///
/// The protocol carries no correlation ids; the server answers commands in
/// the order they were sent, and only `login`, `request_all` and `heartbeat`
/// produce a reply at all. Methods that wait for a reply skip frames of any
/// other kind.
#[derive(Debug)]
pub struct Client {
    addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl Client {
    /// Connects to the server.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> ClientResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!("failed to connect to {}: {}", addr, e))
            })?;

        debug!(addr = %addr, "Connected to server");
        let (reader, writer) = stream.into_split();
        Ok(Self {
            addr,
            reader,
            writer,
            timeout,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Authenticates the session. Returns whether the server accepted.
    ///
    /// A rejected login leaves the connection open for another attempt.
    pub async fn login(&mut self, username: &str, secret: &str) -> ClientResult<bool> {
        self.send(&ClientMessage::login(username, secret)).await?;
        loop {
            match self.read_reply().await? {
                ServerMessage::LoginResult { accepted } => return Ok(accepted),
                other => debug!(?other, "Skipping unexpected reply"),
            }
        }
    }

    /// Appends an entry to the calendar. The server sends no reply.
    pub async fn add(&mut self, entry: CalendarEntry) -> ClientResult<()> {
        self.send(&ClientMessage::command(Command::add(entry))).await
    }

    /// Removes the first entry equal to `entry`. The server sends no reply;
    /// removing an entry that is not there is a silent no-op.
    pub async fn remove(&mut self, entry: CalendarEntry) -> ClientResult<()> {
        self.send(&ClientMessage::command(Command::remove(entry)))
            .await
    }

    /// Replaces the first entry equal to `old` with `new`. The server sends
    /// no reply.
    pub async fn modify(&mut self, old: CalendarEntry, new: CalendarEntry) -> ClientResult<()> {
        self.send(&ClientMessage::command(Command::modify(old, new)))
            .await
    }

    /// Requests the full calendar.
    pub async fn request_all(&mut self) -> ClientResult<Vec<CalendarEntry>> {
        self.send(&ClientMessage::command(Command::request_all()))
            .await?;
        loop {
            match self.read_reply().await? {
                ServerMessage::Snapshot { entries } => return Ok(entries),
                other => debug!(?other, "Skipping unexpected reply"),
            }
        }
    }

    /// Sends a heartbeat and waits for the echo.
    pub async fn heartbeat(&mut self) -> ClientResult<()> {
        self.send(&ClientMessage::command(Command::heartbeat()))
            .await?;
        loop {
            match self.read_reply().await? {
                ServerMessage::Echo { .. } => return Ok(()),
                other => debug!(?other, "Skipping unexpected reply"),
            }
        }
    }

    /// Sends a heartbeat every `interval` until the connection dies,
    /// returning the error that ended it.
    pub async fn run_heartbeat(mut self, interval: Duration) -> ClientError {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.heartbeat().await {
                return e;
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> ClientResult<()> {
        let bytes = encode_message(&Envelope::new(message))?;

        tokio::time::timeout(self.timeout, async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|_| ClientError::Timeout("sending command".into()))?
        .map_err(ClientError::Io)?;

        Ok(())
    }

    async fn read_reply(&mut self) -> ClientResult<ServerMessage> {
        let payload = tokio::time::timeout(self.timeout, async {
            // Read 4-byte length prefix
            let mut len_buf = [0u8; 4];
            match self.reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
            let len = u32::from_be_bytes(len_buf) as usize;

            if len as u32 > MAX_MESSAGE_SIZE {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("reply too large: {} bytes (max: {})", len, MAX_MESSAGE_SIZE),
                ));
            }

            // Read payload
            let mut payload = vec![0u8; len];
            self.reader.read_exact(&mut payload).await?;

            Ok(Some(payload))
        })
        .await
        .map_err(|_| ClientError::Timeout("reading reply".into()))?
        .map_err(ClientError::Io)?;

        let Some(payload) = payload else {
            return Err(ClientError::Disconnected);
        };

        let envelope: Envelope<ServerMessage> = serde_json::from_slice(&payload)
            .map_err(|e| ClientError::Protocol(format!("failed to decode reply: {}", e)))?;

        if !envelope.is_compatible() {
            return Err(ClientError::Protocol(format!(
                "unsupported protocol version: {}",
                envelope.protocol_version
            )));
        }

        Ok(envelope.payload)
    }
}
