//! CLI and socket client for the calsync server.
//!
//! This crate provides the `calsync` command-line interface.

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;

pub use cli::Cli;
pub use client::{Client, HEARTBEAT_INTERVAL};
pub use error::{ClientError, ClientResult};
