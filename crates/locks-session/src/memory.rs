use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distlock::{Clock, SystemClock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::consul::{HeldValue, SessionClient, SessionId};
use crate::error::Error;

/// In-memory session agent for local development and tests.
///
/// Clones share the same keyspace. Sessions past their TTL are invalidated
/// lazily on the next call, deleting the keys they hold.
#[derive(Clone, Debug)]
pub struct MemorySessionAgent {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    available: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<SessionId, Session>,
    keys: HashMap<String, HeldValue>,
}

#[derive(Debug)]
struct Session {
    ttl: Duration,
    expires_at: DateTime<Utc>,
}

impl State {
    fn sweep(&mut self, now: DateTime<Utc>) {
        self.sessions.retain(|_, session| session.expires_at > now);

        let sessions = &self.sessions;
        self.keys.retain(|_, held| {
            held.session
                .as_ref()
                .is_none_or(|session| sessions.contains_key(session))
        });
    }
}

impl Default for MemorySessionAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionAgent {
    /// Creates an empty agent using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates an empty agent using the given clock.
    #[must_use]
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock: Arc::new(clock),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes every subsequent call fail with [`Error::AgentUnavailable`].
    pub fn disconnect(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    /// Undoes [`Self::disconnect`].
    pub fn reconnect(&self) {
        self.available.store(true, Ordering::SeqCst);
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.lock_swept().await.sessions.len()
    }

    async fn lock_swept(&self) -> tokio::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().await;
        state.sweep(self.clock.now());
        state
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::AgentUnavailable)
        }
    }
}

#[async_trait]
impl SessionClient for MemorySessionAgent {
    type Error = Error;

    async fn create_session(&self, ttl: Duration) -> Result<SessionId, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        let id = SessionId(Uuid::new_v4().to_string());
        state.sessions.insert(
            id.clone(),
            Session {
                ttl,
                expires_at: self.clock.deadline(ttl),
            },
        );

        Ok(id)
    }

    async fn acquire(&self, key: &str, value: &str, session: &SessionId) -> Result<bool, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        if !state.sessions.contains_key(session) {
            return Ok(false);
        }

        match state.keys.get(key).and_then(|held| held.session.as_ref()) {
            Some(holder) if holder != session => Ok(false),
            _ => {
                state.keys.insert(
                    key.to_string(),
                    HeldValue {
                        value: value.to_string(),
                        session: Some(session.clone()),
                    },
                );
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<HeldValue>, Error> {
        self.check_available()?;
        Ok(self.lock_swept().await.keys.get(key).cloned())
    }

    async fn renew_session(&self, session: &SessionId) -> Result<bool, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        let Some(entry) = state.sessions.get_mut(session) else {
            return Ok(false);
        };
        entry.expires_at = self.clock.deadline(entry.ttl);

        Ok(true)
    }

    async fn delete_held(&self, key: &str, session: &SessionId) -> Result<bool, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        if state
            .keys
            .get(key)
            .is_some_and(|held| held.session.as_ref() == Some(session))
        {
            state.keys.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<(), Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        state.sessions.remove(session);
        state
            .keys
            .retain(|_, held| held.session.as_ref() != Some(session));

        Ok(())
    }
}
