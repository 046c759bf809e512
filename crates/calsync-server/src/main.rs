//! calsyncd server entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, info};

use calsync_core::{TracingConfig, init_tracing};
use calsync_server::{
    FileCredentialStore, JsonEntryStore, Server, ServerConfig, ServerResult, SignalHandler,
    default_bind_addr, run_console,
};

/// Multi-client calendar synchronization daemon.
#[derive(Debug, Parser)]
#[command(name = "calsyncd", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "CALSYNC_BIND", default_value_t = default_bind_addr())]
    bind: SocketAddr,

    /// Directory for user calendars and credentials
    #[arg(long, env = "CALSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Credential file, defaults to <data-dir>/users.json
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Disable the interactive admin console
    #[arg(long)]
    no_console: bool,

    /// Emit JSON logs instead of human-readable ones
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let mut tracing_config = if cli.json_logs {
        TracingConfig::daemon()
    } else {
        TracingConfig::default()
    };
    if cli.verbose {
        tracing_config = tracing_config.with_level(Level::DEBUG);
    }
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    // 1. Resolve configuration
    let mut config = match cli.data_dir {
        Some(data_dir) => ServerConfig::new(data_dir),
        None => ServerConfig::default(),
    };
    config = config.with_bind_addr(cli.bind);
    if let Some(credentials) = cli.credentials {
        config = config.with_credentials_path(credentials);
    }
    info!(data_dir = %config.data_dir.display(), "Using data directory");

    // 2. Open the stores
    let credentials = Arc::new(FileCredentialStore::load(config.credentials_path.clone())?);
    let entry_store = Arc::new(JsonEntryStore::new(config.entries_dir()));

    // 3. Signal handler
    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    // 4. Bind the listener and start the background tasks
    let server = Arc::new(Server::bind(config, credentials, entry_store).await?);

    // 5. Admin console on stdin
    if !cli.no_console {
        let console_server = server.clone();
        tokio::spawn(async move {
            run_console(console_server, tokio::io::stdin()).await;
        });
    }

    server
        .run_until_shutdown(signal_handler.shutdown().wait())
        .await
}
