use async_trait::async_trait;
use distlock::{
    DistributedLock, Error, LockBackend, LockConfig, LockSpec, Result, StoreError, UNKNOWN_OWNER,
};
use tracing::debug;

/// Data and metadata of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStat {
    /// The node payload.
    pub data: String,

    /// Data version, incremented on every write.
    pub version: i32,

    /// Session owning the node if it is ephemeral, zero otherwise.
    pub ephemeral_owner: i64,
}

/// The primitives of a zookeeper-like ensemble, seen through one client
/// session.
///
/// Ephemeral nodes live exactly as long as the session that created them.
/// Keeping the session alive is the client's job (connection heartbeats),
/// not the caller's.
#[async_trait]
pub trait EphemeralClient: Send + Sync + 'static {
    /// The error type for ensemble operations.
    type Error: StoreError;

    /// The id of this client's session.
    fn session_id(&self) -> i64;

    /// Creates an ephemeral node owned by this session.
    ///
    /// Returns the version of the new node, or `None` if the node exists.
    async fn create_ephemeral(&self, path: &str, data: &str) -> Result<Option<i32>, Self::Error>;

    /// Reads a node.
    async fn get_data(&self, path: &str) -> Result<Option<NodeStat>, Self::Error>;

    /// Deletes a node if its version matches.
    ///
    /// Returns `false` if the node is missing or at another version.
    async fn delete(&self, path: &str, version: i32) -> Result<bool, Self::Error>;
}

/// What an ephemeral lock holder remembers about its node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLease {
    /// Node version observed at creation.
    pub version: i32,

    /// Session that created the node.
    pub session: i64,
}

/// A lock held as an ephemeral node.
pub type EphemeralLock<C> = DistributedLock<EphemeralLocker<C>>;

/// Ephemeral-node lock protocol over an [`EphemeralClient`].
///
/// The lock node is named after the lock and carries the owner id as data.
/// Its lifetime is bound to the client session, so the lock timeout plays
/// no part in expiry: a crashed holder is reclaimed once the ensemble
/// expires its session. Renewal therefore extends nothing; it only checks
/// that the node still exists and belongs to this session, which lets the
/// scheduler report a lost lock.
#[derive(Clone, Debug)]
pub struct EphemeralLocker<C> {
    client: C,
}

impl<C: EphemeralClient> EphemeralLocker<C> {
    /// Creates a backend over the given client session.
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    /// Binds this backend to a lock configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn into_lock(self, config: LockConfig) -> Result<EphemeralLock<C>> {
        DistributedLock::new(self, config)
    }

    /// The underlying client.
    pub const fn client(&self) -> &C {
        &self.client
    }
}

/// Absolute node path of a lock.
fn node_path(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/'))
}

#[async_trait]
impl<C: EphemeralClient> LockBackend for EphemeralLocker<C> {
    type Lease = NodeLease;

    async fn acquire(&self, lock: &LockSpec) -> Result<NodeLease> {
        let path = node_path(&lock.name);

        let created = self
            .client
            .create_ephemeral(&path, &lock.owner_id)
            .await
            .map_err(|e| Error::backend("create", e))?;

        if let Some(version) = created {
            debug!(%path, version, session = self.client.session_id(), "ephemeral node created");
            return Ok(NodeLease {
                version,
                session: self.client.session_id(),
            });
        }

        let owner = self
            .client
            .get_data(&path)
            .await
            .map_err(|e| Error::backend("get_data", e))?
            .map_or_else(|| UNKNOWN_OWNER.to_string(), |node| node.data);
        Err(Error::conflict(&lock.name, owner))
    }

    async fn renew(&self, lock: &LockSpec, lease: &mut NodeLease) -> Result<()> {
        let node = self
            .client
            .get_data(&node_path(&lock.name))
            .await
            .map_err(|e| Error::backend("get_data", e))?;

        match node {
            Some(node)
                if node.ephemeral_owner == lease.session
                    && node.version == lease.version
                    && node.data == lock.owner_id =>
            {
                Ok(())
            }
            _ => Err(Error::not_held(&lock.name, &lock.owner_id)),
        }
    }

    async fn release(&self, lock: &LockSpec, lease: NodeLease) -> Result<()> {
        let deleted = self
            .client
            .delete(&node_path(&lock.name), lease.version)
            .await
            .map_err(|e| Error::backend("delete", e))?;

        if deleted {
            Ok(())
        } else {
            Err(Error::not_held(&lock.name, &lock.owner_id))
        }
    }

    async fn inspect(&self, lock: &LockSpec) -> Result<Option<String>> {
        Ok(self
            .client
            .get_data(&node_path(&lock.name))
            .await
            .map_err(|e| Error::backend("get_data", e))?
            .map(|node| node.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryEnsemble;
    use assert_matches::assert_matches;
    use distlock::{LockEvent, LockStatus, Locker};
    use std::time::Duration;

    fn config(owner: &str) -> LockConfig {
        LockConfig::new("leader")
            .with_owner_id(owner)
            .with_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_node_path() {
        assert_eq!(node_path("leader"), "/leader");
        assert_eq!(node_path("/leader"), "/leader");
    }

    #[tokio::test]
    async fn test_node_exclusive_while_session_lives() {
        let ensemble = MemoryEnsemble::new();
        let a = EphemeralLocker::new(ensemble.connect())
            .into_lock(config("node-a"))
            .unwrap();
        let b = EphemeralLocker::new(ensemble.connect())
            .into_lock(config("node-b"))
            .unwrap();

        a.lock().await.unwrap();

        assert_matches!(b.lock().await, Err(Error::Conflict { owner, .. }) if owner == "node-a");
        assert_eq!(a.status().await.unwrap(), LockStatus::HeldBySelf);
        a.renew().await.unwrap();

        a.unlock().await.unwrap();
        b.lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_session_frees_the_node() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        let a = EphemeralLocker::new(session.clone())
            .into_lock(config("node-a"))
            .unwrap();
        let b = EphemeralLocker::new(ensemble.connect())
            .into_lock(config("node-b"))
            .unwrap();

        a.lock().await.unwrap();
        session.close().await;

        b.lock().await.unwrap();
        assert_eq!(b.status().await.unwrap(), LockStatus::HeldBySelf);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_reports_a_lost_node() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        let a = EphemeralLocker::new(session.clone())
            .into_lock(config("node-a"))
            .unwrap();
        let b = EphemeralLocker::new(ensemble.connect())
            .into_lock(config("node-b"))
            .unwrap();

        a.lock().await.unwrap();
        let mut events = a.subscribe();

        ensemble.expire_session(session.session_id()).await;
        b.lock().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_matches!(events.recv().await.unwrap(), LockEvent::RenewalFailed { .. });
    }

    #[tokio::test]
    async fn test_stale_release_keeps_new_holder() {
        let ensemble = MemoryEnsemble::new();
        let first = ensemble.connect();
        let backend = EphemeralLocker::new(first.clone());
        let spec = LockSpec::from(&config("node-a"));

        let lease = backend.acquire(&spec).await.unwrap();
        ensemble.expire_session(first.session_id()).await;

        let a_again = EphemeralLocker::new(ensemble.connect())
            .into_lock(config("node-a"))
            .unwrap();
        a_again.lock().await.unwrap();

        let mut stale = lease;
        assert!(backend.renew(&spec, &mut stale).await.is_err());
        assert!(backend.release(&spec, lease).await.is_err());
        assert_eq!(a_again.status().await.unwrap(), LockStatus::HeldBySelf);
    }
}
