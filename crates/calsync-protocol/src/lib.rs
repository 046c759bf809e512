//! Wire protocol for the calsync client/server link.
//!
//! This module defines Protocol v1 for communication between calsync
//! clients and the server over TCP.
//!
//! # Protocol Overview
//!
//! Messages are sent as length-prefixed JSON:
//! - 4 bytes: message length (u32, big-endian)
//! - N bytes: JSON payload
//!
//! # Envelope Structure
//!
//! Every message is wrapped in an [`Envelope`] containing:
//! - `protocol_version`: Always "1" for this version
//! - `payload`: The actual client or server message
//!
//! # Example
//!
//! ```rust
//! use calsync_protocol::{ClientMessage, Envelope, decode_message, encode_message};
//!
//! let message = Envelope::new(ClientMessage::login("alice", "wonderland"));
//! let bytes = encode_message(&message).unwrap();
//! let decoded: Envelope<ClientMessage> = decode_message(&bytes).unwrap();
//! ```

mod command;
mod error;
mod framing;
mod types;

#[cfg(test)]
mod golden_tests;

pub use command::{Command, CommandKind};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_message, encode_message};
pub use types::{ClientMessage, Envelope, ServerMessage};

/// Protocol version constant.
pub const PROTOCOL_VERSION: &str = "1";

/// Maximum message size (1 MB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;
