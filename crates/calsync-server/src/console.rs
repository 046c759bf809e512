//! Interactive admin console.
//!
//! Reads commands line by line and runs them against the server. Output
//! goes straight to stdout, it is meant for an operator at a terminal.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::ServerError;
use crate::server::Server;

/// Runs the console until `stop` is entered or the input ends.
///
/// `stop` also shuts the server down. Anything unrecognized prints the
/// help text.
pub async fn run_console<R>(server: Arc<Server>, input: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            ["stop"] => {
                server.stop();
                break;
            }
            ["create", username, secret] => match server.create_user(username, secret) {
                Ok(()) => println!("Created user '{username}'"),
                Err(ServerError::UserExists { .. }) => {
                    println!("User '{username}' already exists");
                }
                Err(e) => println!("Failed to create user: {e}"),
            },
            ["remove", username] => match server.remove_user(username) {
                Ok(()) => println!("Removed user '{username}' from database"),
                Err(ServerError::UnknownUser { .. }) => {
                    println!("No user by name '{username}' found");
                }
                Err(e) => println!("Failed to remove user: {e}"),
            },
            ["kick", username] => {
                if server.kick_user(username).await {
                    println!("Kicked user '{username}'");
                } else {
                    println!("No user by name '{username}' found");
                }
            }
            ["list"] => {
                println!("Connected: {}", server.connected_users().await.join(", "));
                println!("Registered: {}", server.list_users().join(", "));
            }
            _ => print_help(),
        }
    }
}

fn print_help() {
    println!("Help:");
    println!("\tstop - stops the server");
    println!("\tcreate <username> <password> - creates new user");
    println!("\tremove <username> - removes user");
    println!("\tkick <username> - kicks user from server");
    println!("\tlist - lists all users");
    println!("\thelp - prints out help");
}
