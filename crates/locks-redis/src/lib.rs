//! Redis store client for compare-and-swap locks.
//!
//! [`RedisKv`] implements [`ExpiringKv`] on a redis server: acquisition is
//! `SET key value NX PX ttl`, renewal and release run [`RENEW_SCRIPT`] and
//! [`RELEASE_SCRIPT`] so the owner comparison happens on the server. Pair
//! it with [`distlock_cas::RedisLocker`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use distlock_cas::{ExpiringKv, RELEASE_SCRIPT, RENEW_SCRIPT};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, instrument};

/// An [`ExpiringKv`] backed by a redis server.
///
/// Clones share one multiplexed connection, which reconnects on its own
/// after the server goes away.
#[derive(Clone)]
pub struct RedisKv {
    connection: ConnectionManager,
    renew: Script,
    release: Script,
}

impl Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

impl RedisKv {
    /// Connects to the server at `url` (`redis://host:port/db`).
    ///
    /// # Errors
    ///
    /// Returns an error if the url is invalid or the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        debug!("connected to redis");

        Ok(Self::from_connection(connection))
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

/// `PX` takes whole milliseconds and rejects zero.
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl ExpiringKv for RedisKv {
    type Error = Error;

    #[instrument(skip(self, value))]
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let mut connection = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut connection)
            .await?;

        Ok(reply.is_some())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut connection = self.connection.clone();

        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await?;

        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let mut connection = self.connection.clone();

        let extended: i64 = self
            .renew
            .key(key)
            .arg(value)
            .arg(millis(ttl))
            .invoke_async(&mut connection)
            .await?;

        Ok(extended == 1)
    }

    #[instrument(skip(self, value))]
    async fn del_if_eq(&self, key: &str, value: &str) -> Result<bool, Error> {
        let mut connection = self.connection.clone();

        let deleted: i64 = self
            .release
            .key(key)
            .arg(value)
            .invoke_async(&mut connection)
            .await?;

        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use distlock::{LockConfig, LockStatus, Locker};
    use distlock_cas::{RedisLock, RedisLocker};
    use uuid::Uuid;

    async fn test_kv() -> RedisKv {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        RedisKv::connect(&redis_url)
            .await
            .expect("Failed to connect to redis for tests")
    }

    fn unique_key(prefix: &str) -> String {
        format!("test_locks_{}_{}", prefix, Uuid::new_v4().as_hyphenated())
    }

    fn lock_for(kv: &RedisKv, name: &str, owner: &str, timeout: Duration) -> RedisLock<RedisKv> {
        RedisLocker::new(kv.clone())
            .into_lock(
                LockConfig::new(name)
                    .with_owner_id(owner)
                    .with_timeout(timeout),
            )
            .unwrap()
    }

    #[test]
    fn test_millis_is_never_zero() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2_000);
    }

    #[tokio::test]
    #[ignore = "requires a redis server at REDIS_URL"]
    async fn test_scripts_compare_the_owner() {
        let kv = test_kv().await;
        let key = unique_key("scripts");
        let ttl = Duration::from_secs(60);

        assert!(kv.set_nx(&key, "node-a", ttl).await.unwrap());
        assert!(!kv.set_nx(&key, "node-b", ttl).await.unwrap());
        assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("node-a"));

        assert!(!kv.expire_if_eq(&key, "node-b", ttl).await.unwrap());
        assert!(kv.expire_if_eq(&key, "node-a", ttl).await.unwrap());

        assert!(!kv.del_if_eq(&key, "node-b").await.unwrap());
        assert!(kv.del_if_eq(&key, "node-a").await.unwrap());
        assert!(kv.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a redis server at REDIS_URL"]
    async fn test_key_expires_without_renewal() {
        let kv = test_kv().await;
        let key = unique_key("expiry");

        assert!(kv.set_nx(&key, "node-a", Duration::from_millis(200)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(kv.get(&key).await.unwrap().is_none());
        assert!(!kv.expire_if_eq(&key, "node-a", Duration::from_secs(1)).await.unwrap());
        assert!(kv.set_nx(&key, "node-b", Duration::from_secs(60)).await.unwrap());
        assert!(kv.del_if_eq(&key, "node-b").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a redis server at REDIS_URL"]
    async fn test_lock_conflict_and_handover() {
        let kv = test_kv().await;
        let name = unique_key("handover");
        let a = lock_for(&kv, &name, "node-a", Duration::from_secs(60));
        let b = lock_for(&kv, &name, "node-b", Duration::from_secs(60));

        a.lock().await.unwrap();
        assert_matches!(
            b.lock().await,
            Err(distlock::Error::Conflict { owner, .. }) if owner == "node-a"
        );
        assert_eq!(
            b.status().await.unwrap(),
            LockStatus::HeldByOther("node-a".into())
        );

        a.unlock().await.unwrap();
        b.lock().await.unwrap();
        assert_eq!(b.status().await.unwrap(), LockStatus::HeldBySelf);

        b.unlock().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a redis server at REDIS_URL"]
    async fn test_concurrent_lock_has_one_winner() {
        let kv = test_kv().await;
        let name = unique_key("race");
        let a = lock_for(&kv, &name, "node-a", Duration::from_secs(60));
        let b = lock_for(&kv, &name, "node-b", Duration::from_secs(60));

        let (first, second) = tokio::join!(a.lock(), b.lock());

        assert_ne!(first.is_ok(), second.is_ok());
        a.unlock().await.unwrap();
        b.unlock().await.unwrap();
    }
}
