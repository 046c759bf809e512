//! Server orchestration.
//!
//! [`Server`] owns the listener, the shared stores, the dispatcher and
//! the session registry. It accepts connections until asked to stop,
//! then closes every session, drains the dispatcher and waits for the
//! reaper before returning.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::{CredentialStore, is_valid_username};
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, DispatcherHandle};
use crate::error::{ServerError, ServerResult};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::store::EntryStore;

/// The calendar synchronization server.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    credentials: Arc<dyn CredentialStore>,
    entry_store: Arc<dyn EntryStore>,
    registry: Arc<SessionRegistry>,
    dispatcher: DispatcherHandle,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
    departure_tx: Mutex<Option<mpsc::UnboundedSender<u64>>>,
    next_session_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Binds the listener and starts the dispatcher and session reaper.
    ///
    /// Calendars of users no longer in the credential store are deleted
    /// before the listener opens. The sweep runs only at startup, never
    /// while sessions are live.
    pub async fn bind(
        config: ServerConfig,
        credentials: Arc<dyn CredentialStore>,
        entry_store: Arc<dyn EntryStore>,
    ) -> ServerResult<Self> {
        sweep_orphaned_data(credentials.as_ref(), entry_store.as_ref());

        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "Server listening");

        let dispatcher = Dispatcher::new();
        let dispatcher_handle = dispatcher.handle();
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let registry = Arc::new(SessionRegistry::new());
        let (departure_tx, departure_rx) = mpsc::unbounded_channel();
        let reaper_task = tokio::spawn(registry.clone().run_reaper(departure_rx));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            listener,
            credentials,
            entry_store,
            registry,
            dispatcher: dispatcher_handle,
            dispatcher_task: Mutex::new(Some(dispatcher_task)),
            reaper_task: Mutex::new(Some(reaper_task)),
            departure_tx: Mutex::new(Some(departure_tx)),
            next_session_id: AtomicU64::new(1),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Accepts connections until [`Server::stop`] is called, then closes
    /// every session and drains the dispatcher.
    pub async fn run(&self) -> ServerResult<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!(peer = %peer, "New client connected");
                            self.spawn_session(stream, peer).await;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting despite errors
                        }
                    }
                }
            }
        }

        self.shutdown_sessions().await;
        Ok(())
    }

    /// Runs the server, stopping once `shutdown` completes.
    pub async fn run_until_shutdown<S>(&self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown.await;
            let _ = shutdown_tx.send(true);
        });
        self.run().await
    }

    /// Asks the accept loop to stop. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(departure_tx) = self.departure_tx.lock().await.clone() else {
            return;
        };

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (kick_tx, kick_rx) = watch::channel(false);
        let session = Session::new(
            id,
            peer,
            stream,
            self.credentials.clone(),
            self.entry_store.clone(),
            self.dispatcher.clone(),
            kick_rx,
            departure_tx,
        );
        self.registry.spawn(session, kick_tx).await;
    }

    async fn shutdown_sessions(&self) {
        let joins = self.registry.close_all().await;
        let count = joins.len();
        for join in joins {
            if let Err(e) = join.await {
                error!(error = %e, "Session task failed during shutdown");
            }
        }
        if count > 0 {
            info!(sessions = count, "All sessions closed");
        }

        // Queued commands are applied before the dispatcher stops.
        self.dispatcher.shutdown();
        if let Some(task) = self.dispatcher_task.lock().await.take()
            && let Err(e) = task.await
        {
            error!(error = %e, "Dispatcher task failed");
        }

        // With every session gone, dropping our departure sender ends the reaper.
        self.departure_tx.lock().await.take();
        if let Some(task) = self.reaper_task.lock().await.take()
            && let Err(e) = task.await
        {
            error!(error = %e, "Reaper task failed");
        }

        info!("Server stopped");
    }

    /// Creates a user account.
    pub fn create_user(&self, username: &str, secret: &str) -> ServerResult<()> {
        if !is_valid_username(username) {
            return Err(ServerError::credentials(format!(
                "invalid username '{username}': use letters, digits, '.', '_' or '-'"
            )));
        }
        if self.credentials.add(username, secret)? {
            Ok(())
        } else {
            Err(ServerError::user_exists(username))
        }
    }

    /// Removes a user account. Live sessions of the user stay connected;
    /// their calendar is swept at the next startup.
    pub fn remove_user(&self, username: &str) -> ServerResult<()> {
        if self.credentials.remove(username)? {
            Ok(())
        } else {
            Err(ServerError::unknown_user(username))
        }
    }

    /// Disconnects one session authenticated as `username`. Returns true
    /// if a session was found.
    pub async fn kick_user(&self, username: &str) -> bool {
        self.registry.kick(username).await
    }

    /// Returns every registered username, sorted.
    pub fn list_users(&self) -> Vec<String> {
        self.credentials.list_all()
    }

    /// Returns the identification of every live session, sorted.
    pub async fn connected_users(&self) -> Vec<String> {
        self.registry.connected().await
    }

    /// Returns the number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the configuration the server was started with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Deletes calendars whose owner is no longer registered.
fn sweep_orphaned_data(credentials: &dyn CredentialStore, entry_store: &dyn EntryStore) {
    let usernames = match entry_store.usernames() {
        Ok(usernames) => usernames,
        Err(e) => {
            warn!(error = %e, "Failed to scan entry store, skipping sweep");
            return;
        }
    };

    for username in usernames {
        if credentials.exists(&username) {
            continue;
        }
        match entry_store.delete(&username) {
            Ok(true) => info!(username = %username, "Deleted calendar of unknown user"),
            Ok(false) => {}
            Err(e) => {
                warn!(username = %username, error = %e, "Failed to delete orphaned calendar");
            }
        }
    }
}
