use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use distlock::{
    DistributedLock, Error, LockBackend, LockConfig, LockSpec, Result, StoreError, UNKNOWN_OWNER,
};
use tracing::{debug, warn};

/// Identifier of an agent session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key and the session currently holding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeldValue {
    /// The stored value.
    pub value: String,

    /// The session holding the key, if any.
    pub session: Option<SessionId>,
}

/// The primitives of a consul-like agent with TTL sessions.
///
/// Sessions are created with the `delete` behavior: when a session is
/// invalidated, by expiry or destruction, the keys it holds are deleted.
#[async_trait]
pub trait SessionClient: Send + Sync + 'static {
    /// The error type for agent operations.
    type Error: StoreError;

    /// Creates a session invalidated after `ttl` unless renewed.
    async fn create_session(&self, ttl: Duration) -> Result<SessionId, Self::Error>;

    /// Writes `key = value` held by `session` (`?acquire=`).
    ///
    /// Returns `false` if another session already holds the key.
    async fn acquire(
        &self,
        key: &str,
        value: &str,
        session: &SessionId,
    ) -> Result<bool, Self::Error>;

    /// Reads a key and its holder.
    async fn get(&self, key: &str) -> Result<Option<HeldValue>, Self::Error>;

    /// Resets the session TTL. Returns `false` if the session no longer exists.
    async fn renew_session(&self, session: &SessionId) -> Result<bool, Self::Error>;

    /// Deletes `key` if `session` holds it.
    ///
    /// Returns `false` if the key is missing or held by another session.
    async fn delete_held(&self, key: &str, session: &SessionId) -> Result<bool, Self::Error>;

    /// Destroys a session. Unknown sessions are ignored.
    async fn destroy_session(&self, session: &SessionId) -> Result<(), Self::Error>;
}

/// A lock held through an agent session.
pub type SessionLock<C> = DistributedLock<SessionLocker<C>>;

/// Session-based lock protocol over a [`SessionClient`].
///
/// Acquisition creates a session with the lock timeout as its TTL and
/// writes the lock key held by it. Renewal renews the session; the key
/// lives exactly as long as the session does.
#[derive(Clone, Debug)]
pub struct SessionLocker<C> {
    client: C,
}

impl<C: SessionClient> SessionLocker<C> {
    /// Creates a backend talking to the given agent client.
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    /// Binds this backend to a lock configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn into_lock(self, config: LockConfig) -> Result<SessionLock<C>> {
        DistributedLock::new(self, config)
    }

    /// The underlying agent client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    async fn discard(&self, session: &SessionId) {
        if let Err(err) = self.client.destroy_session(session).await {
            warn!(%session, error = %err, "failed to destroy unused session");
        }
    }
}

#[async_trait]
impl<C: SessionClient> LockBackend for SessionLocker<C> {
    type Lease = SessionId;

    async fn acquire(&self, lock: &LockSpec) -> Result<SessionId> {
        let session = self
            .client
            .create_session(lock.timeout)
            .await
            .map_err(|e| Error::backend("create_session", e))?;

        match self.client.acquire(&lock.name, &lock.owner_id, &session).await {
            Ok(true) => {
                debug!(lock = %lock.name, %session, "key acquired by session");
                Ok(session)
            }
            Ok(false) => {
                self.discard(&session).await;
                let owner = self
                    .client
                    .get(&lock.name)
                    .await
                    .map_err(|e| Error::backend("get", e))?
                    .map_or_else(|| UNKNOWN_OWNER.to_string(), |held| held.value);
                Err(Error::conflict(&lock.name, owner))
            }
            Err(err) => {
                self.discard(&session).await;
                Err(Error::backend("acquire", err))
            }
        }
    }

    async fn renew(&self, lock: &LockSpec, session: &mut SessionId) -> Result<()> {
        let renewed = self
            .client
            .renew_session(session)
            .await
            .map_err(|e| Error::backend("renew_session", e))?;

        if renewed {
            Ok(())
        } else {
            Err(Error::not_held(&lock.name, &lock.owner_id))
        }
    }

    async fn release(&self, lock: &LockSpec, session: SessionId) -> Result<()> {
        let deleted = self
            .client
            .delete_held(&lock.name, &session)
            .await
            .map_err(|e| Error::backend("delete", e))?;

        self.client
            .destroy_session(&session)
            .await
            .map_err(|e| Error::backend("destroy_session", e))?;

        if deleted {
            Ok(())
        } else {
            Err(Error::not_held(&lock.name, &lock.owner_id))
        }
    }

    async fn inspect(&self, lock: &LockSpec) -> Result<Option<String>> {
        Ok(self
            .client
            .get(&lock.name)
            .await
            .map_err(|e| Error::backend("get", e))?
            .filter(|held| held.session.is_some())
            .map(|held| held.value))
    }
}
