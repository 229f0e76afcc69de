use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::Error;
use crate::zookeeper::{EphemeralClient, NodeStat};

/// In-memory ensemble for local development and tests.
///
/// Sessions never time out on their own; a crashed client is simulated
/// with [`MemoryZkClient::close`] or [`MemoryEnsemble::expire_session`].
#[derive(Clone, Debug, Default)]
pub struct MemoryEnsemble {
    state: Arc<Mutex<State>>,
    last_session: Arc<AtomicI64>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, NodeStat>,
    expired: HashSet<i64>,
}

impl MemoryEnsemble {
    /// Creates an empty ensemble.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new client session.
    #[must_use]
    pub fn connect(&self) -> MemoryZkClient {
        MemoryZkClient {
            ensemble: self.clone(),
            session: self.last_session.fetch_add(1, Ordering::SeqCst) + 1,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Expires a session, deleting its ephemeral nodes.
    pub async fn expire_session(&self, session: i64) {
        let mut state = self.state.lock().await;

        state.expired.insert(session);
        state.nodes.retain(|_, node| node.ephemeral_owner != session);

        debug!(session, "session expired");
    }
}

/// A client session on a [`MemoryEnsemble`]. Clones share the session.
#[derive(Clone, Debug)]
pub struct MemoryZkClient {
    ensemble: MemoryEnsemble,
    session: i64,
    connected: Arc<AtomicBool>,
}

impl MemoryZkClient {
    /// Closes the session, deleting its ephemeral nodes.
    pub async fn close(&self) {
        self.ensemble.expire_session(self.session).await;
    }

    /// Makes every subsequent call fail with [`Error::ConnectionLoss`].
    /// The session itself stays alive.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Undoes [`Self::disconnect`].
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    async fn state(&self) -> Result<MutexGuard<'_, State>, Error> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::ConnectionLoss);
        }

        let state = self.ensemble.state.lock().await;
        if state.expired.contains(&self.session) {
            return Err(Error::SessionClosed(self.session));
        }

        Ok(state)
    }
}

#[async_trait]
impl EphemeralClient for MemoryZkClient {
    type Error = Error;

    fn session_id(&self) -> i64 {
        self.session
    }

    async fn create_ephemeral(&self, path: &str, data: &str) -> Result<Option<i32>, Error> {
        let mut state = self.state().await?;

        if state.nodes.contains_key(path) {
            return Ok(None);
        }

        state.nodes.insert(
            path.to_string(),
            NodeStat {
                data: data.to_string(),
                version: 0,
                ephemeral_owner: self.session,
            },
        );

        Ok(Some(0))
    }

    async fn get_data(&self, path: &str) -> Result<Option<NodeStat>, Error> {
        Ok(self.state().await?.nodes.get(path).cloned())
    }

    async fn delete(&self, path: &str, version: i32) -> Result<bool, Error> {
        let mut state = self.state().await?;

        if state.nodes.get(path).is_some_and(|node| node.version == version) {
            state.nodes.remove(path);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
