//! Registry of live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::session::{Session, SessionState};

#[derive(Debug)]
struct SessionHandle {
    kick_tx: watch::Sender<bool>,
    state: Arc<SessionState>,
    join: JoinHandle<()>,
}

/// Tracks every live session and owns their kick switches.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a session task and registers it.
    pub(crate) async fn spawn(&self, session: Session, kick_tx: watch::Sender<bool>) {
        let state = session.state();
        let id = state.id();
        // Register under the lock so the departure reaper cannot observe
        // this session before it is present.
        let mut sessions = self.sessions.lock().await;
        let join = tokio::spawn(session.run());
        sessions.insert(
            id,
            SessionHandle {
                kick_tx,
                state,
                join,
            },
        );
    }

    /// Removes a finished session and waits for its task.
    pub(crate) async fn reap(&self, id: u64) {
        let handle = self.sessions.lock().await.remove(&id);
        let Some(handle) = handle else {
            return;
        };
        if let Err(e) = handle.join.await {
            error!(session_id = id, error = %e, "Session task failed");
        }
        info!(
            identification = %handle.state.identification(),
            "Client disconnected"
        );
    }

    /// Kicks the first session authenticated as `username`. Returns true
    /// if one was found.
    pub async fn kick(&self, username: &str) -> bool {
        let sessions = self.sessions.lock().await;
        for handle in sessions.values() {
            if handle.state.username() == Some(username) {
                let _ = handle.kick_tx.send(true);
                return true;
            }
        }
        false
    }

    /// Returns the identification of every live session, sorted.
    pub async fn connected(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        let mut names: Vec<String> = sessions
            .values()
            .map(|handle| handle.state.identification())
            .collect();
        names.sort();
        names
    }

    /// Returns the number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Kicks every session, returning the join handles to await.
    pub(crate) async fn close_all(&self) -> Vec<JoinHandle<()>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .drain()
            .map(|(_, handle)| {
                let _ = handle.kick_tx.send(true);
                handle.join
            })
            .collect()
    }

    /// Consumes session departures until the channel closes.
    pub(crate) async fn run_reaper(
        self: Arc<Self>,
        mut departures: mpsc::UnboundedReceiver<u64>,
    ) {
        while let Some(id) = departures.recv().await {
            self.reap(id).await;
        }
        debug!("Session reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_has_no_sessions() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.session_count().await, 0);
        assert!(registry.connected().await.is_empty());
        assert!(!registry.kick("alice").await);
        // Reaping an unknown id is harmless
        registry.reap(42).await;
    }
}
