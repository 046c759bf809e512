//! Ping command.

use std::time::Instant;

use crate::client::Client;
use crate::error::ClientResult;

/// Measures one heartbeat round trip.
pub async fn run(client: &mut Client) -> ClientResult<()> {
    let start = Instant::now();
    client.heartbeat().await?;
    println!("Server answered in {} ms", start.elapsed().as_millis());
    Ok(())
}
