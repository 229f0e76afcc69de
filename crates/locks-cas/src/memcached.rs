use std::time::Duration;

use async_trait::async_trait;
use distlock::{
    DistributedLock, Error, LockBackend, LockConfig, LockSpec, Result, StoreError, UNKNOWN_OWNER,
};
use tracing::debug;

/// Longest expiration memcached treats as relative. Larger values are read
/// as absolute unix timestamps.
pub const MAX_RELATIVE_EXPIRATION: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// A value with its compare-and-swap token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned {
    /// The stored value.
    pub value: String,

    /// Token changing on every write.
    pub cas: u64,
}

/// The primitives of a memcached-like store with compare-and-swap tokens.
#[async_trait]
pub trait VersionedKv: Send + Sync + 'static {
    /// The error type for store operations.
    type Error: StoreError;

    /// Stores `key = value` only if the key does not exist.
    ///
    /// Returns the token of the new item, or `None` if the key exists.
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<Option<u64>, Self::Error>;

    /// Reads a key with its token.
    async fn gets(&self, key: &str) -> Result<Option<Versioned>, Self::Error>;

    /// Replaces `key` if its token is still `cas`, resetting its expiry.
    ///
    /// Returns the new token, or `None` if the key is missing or changed.
    async fn cas(&self, key: &str, value: &str, ttl: Duration, cas: u64)
    -> Result<Option<u64>, Self::Error>;

    /// Deletes `key` if its token is still `cas`.
    async fn delete_cas(&self, key: &str, cas: u64) -> Result<bool, Self::Error>;
}

/// A lock held as a versioned item.
pub type MemcachedLock<C> = DistributedLock<MemcachedLocker<C>>;

/// Compare-and-swap lock protocol over a [`VersionedKv`].
///
/// The holder keeps the token of its last write; renewal and release only
/// succeed while the item is unchanged since then. Finding our own owner id
/// on acquisition counts as already holding the lock.
#[derive(Clone, Debug)]
pub struct MemcachedLocker<C> {
    client: C,
}

impl<C: VersionedKv> MemcachedLocker<C> {
    /// Creates a backend talking to the given store client.
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    /// Binds this backend to a lock configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid or its
    /// timeout exceeds [`MAX_RELATIVE_EXPIRATION`].
    pub fn into_lock(self, config: LockConfig) -> Result<MemcachedLock<C>> {
        expiration(config.timeout)?;
        DistributedLock::new(self, config)
    }

    /// The underlying store client.
    pub const fn client(&self) -> &C {
        &self.client
    }
}

/// Item expirations are whole seconds; round up so the item never
/// undercuts the timeout.
fn expiration(timeout: Duration) -> Result<Duration> {
    let rounded = Duration::from_secs(timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0));

    if rounded > MAX_RELATIVE_EXPIRATION {
        return Err(Error::Configuration(format!(
            "timeout {timeout:?} exceeds the expiration limit of {MAX_RELATIVE_EXPIRATION:?}"
        )));
    }

    Ok(rounded.max(Duration::from_secs(1)))
}

#[async_trait]
impl<C: VersionedKv> LockBackend for MemcachedLocker<C> {
    type Lease = u64;

    async fn acquire(&self, lock: &LockSpec) -> Result<u64> {
        let ttl = expiration(lock.timeout)?;

        let added = self
            .client
            .add(&lock.name, &lock.owner_id, ttl)
            .await
            .map_err(|e| Error::backend("add", e))?;
        if let Some(cas) = added {
            return Ok(cas);
        }

        let current = self
            .client
            .gets(&lock.name)
            .await
            .map_err(|e| Error::backend("gets", e))?;

        match current {
            Some(item) if item.value == lock.owner_id => {
                let replaced = self
                    .client
                    .cas(&lock.name, &lock.owner_id, ttl, item.cas)
                    .await
                    .map_err(|e| Error::backend("cas", e))?;

                replaced.map_or_else(
                    || Err(Error::conflict(&lock.name, UNKNOWN_OWNER)),
                    |cas| {
                        debug!(lock = %lock.name, "re-entered lock already held by this owner");
                        Ok(cas)
                    },
                )
            }
            Some(item) => Err(Error::conflict(&lock.name, item.value)),
            None => Err(Error::conflict(&lock.name, UNKNOWN_OWNER)),
        }
    }

    async fn renew(&self, lock: &LockSpec, cas: &mut u64) -> Result<()> {
        let ttl = expiration(lock.timeout)?;

        let replaced = self
            .client
            .cas(&lock.name, &lock.owner_id, ttl, *cas)
            .await
            .map_err(|e| Error::backend("cas", e))?;

        match replaced {
            Some(next) => {
                *cas = next;
                Ok(())
            }
            None => Err(Error::not_held(&lock.name, &lock.owner_id)),
        }
    }

    async fn release(&self, lock: &LockSpec, cas: u64) -> Result<()> {
        let deleted = self
            .client
            .delete_cas(&lock.name, cas)
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
            .gets(&lock.name)
            .await
            .map_err(|e| Error::backend("gets", e))?
            .map(|item| item.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryVersionedKv;
    use assert_matches::assert_matches;
    use distlock::{LockStatus, Locker, TokioClock};

    fn config(owner: &str, clock: TokioClock) -> LockConfig {
        LockConfig::new("reports")
            .with_owner_id(owner)
            .with_timeout(Duration::from_secs(2))
            .with_clock(clock)
    }

    #[test]
    fn test_expiration_rounding_and_limit() {
        assert_eq!(expiration(Duration::from_millis(1_200)).unwrap(), Duration::from_secs(2));
        assert_eq!(expiration(Duration::from_millis(1)).unwrap(), Duration::from_secs(1));
        assert_eq!(expiration(MAX_RELATIVE_EXPIRATION).unwrap(), MAX_RELATIVE_EXPIRATION);
        assert_matches!(
            expiration(MAX_RELATIVE_EXPIRATION + Duration::from_secs(1)),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_rejects_long_timeouts_up_front() {
        let result = MemcachedLocker::new(MemoryVersionedKv::new()).into_lock(
            LockConfig::new("reports").with_timeout(Duration::from_secs(60 * 60 * 24 * 31)),
        );

        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_rotates_the_token() {
        let clock = TokioClock::new();
        let store = MemoryVersionedKv::with_clock(clock);
        let backend = MemcachedLocker::new(store.clone());
        let spec = LockSpec::from(&config("node-a", clock));

        let mut cas = backend.acquire(&spec).await.unwrap();
        let first = cas;
        backend.renew(&spec, &mut cas).await.unwrap();

        assert_ne!(first, cas);
        assert_matches!(backend.release(&spec, first).await, Err(Error::NotHeld { .. }));
        backend.release(&spec, cas).await.unwrap();
        assert!(store.gets("reports").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_owner_re_enters_and_other_conflicts() {
        let clock = TokioClock::new();
        let store = MemoryVersionedKv::with_clock(clock);
        let a = MemcachedLocker::new(store.clone())
            .into_lock(config("node-a", clock))
            .unwrap();
        let a_again = MemcachedLocker::new(store.clone())
            .into_lock(config("node-a", clock))
            .unwrap();
        let b = MemcachedLocker::new(store.clone())
            .into_lock(config("node-b", clock))
            .unwrap();

        a.lock().await.unwrap();
        a_again.lock().await.unwrap();

        assert_matches!(b.lock().await, Err(Error::Conflict { owner, .. }) if owner == "node-a");
        assert_eq!(b.status().await.unwrap(), LockStatus::HeldByOther("node-a".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_keeps_item_alive() {
        let clock = TokioClock::new();
        let store = MemoryVersionedKv::with_clock(clock);
        let a = MemcachedLocker::new(store.clone())
            .into_lock(config("node-a", clock))
            .unwrap();

        a.lock().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(a.status().await.unwrap(), LockStatus::HeldBySelf);
        a.unlock().await.unwrap();
        assert_eq!(a.status().await.unwrap(), LockStatus::Free);
    }
}
