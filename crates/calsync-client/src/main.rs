//! calsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use calsync_client::cli::{Cli, Command};
use calsync_client::client::Client;
use calsync_client::commands;
use calsync_client::error::{ClientError, ClientResult};
use calsync_core::{CalendarEntry, TracingConfig, TracingOutputFormat, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::default()
            .with_level(Level::WARN)
            .with_format(TracingOutputFormat::Compact)
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    // Run the command
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let mut client = Client::connect(cli.addr, cli.connect_timeout()).await?;

    if !client.login(&cli.user, &cli.secret).await? {
        return Err(ClientError::Auth(format!(
            "server rejected credentials for '{}'",
            cli.user
        )));
    }

    match cli.command {
        Command::Add { entry } => commands::calendar::add(&mut client, entry.to_entry()).await,
        Command::Remove { entry } => {
            commands::calendar::remove(&mut client, entry.to_entry()).await
        }
        Command::Modify {
            old,
            new_date,
            new_start,
            new_end,
            new_name,
            new_description,
        } => {
            let old = old.to_entry();
            let new = CalendarEntry::new(
                new_date.unwrap_or(old.date),
                new_start.unwrap_or(old.start_time),
                new_end.unwrap_or(old.end_time),
                new_name.unwrap_or_else(|| old.name.clone()),
                new_description.unwrap_or_else(|| old.description.clone()),
            );
            commands::calendar::modify(&mut client, old, new).await
        }
        Command::List => commands::calendar::list(&mut client).await,
        Command::Ping => commands::ping::run(&mut client).await,
    }
}
