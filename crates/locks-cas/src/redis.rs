use std::time::Duration;

use async_trait::async_trait;
use distlock::{
    DistributedLock, Error, LockBackend, LockConfig, LockSpec, Result, StoreError, UNKNOWN_OWNER,
};
use tracing::debug;

/// Server-side script extending a key's expiry only if it still holds the
/// caller's value. `KEYS[1]` is the lock key, `ARGV[1]` the owner id and
/// `ARGV[2]` the expiry in milliseconds. Returns 1 if extended.
pub const RENEW_SCRIPT: &str = r#"if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end"#;

/// Server-side script deleting a key only if it still holds the caller's
/// value. `KEYS[1]` is the lock key, `ARGV[1]` the owner id. Returns 1 if
/// deleted.
pub const RELEASE_SCRIPT: &str = r#"if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end"#;

/// The primitives of a redis-like store with per-key expiry.
///
/// The conditional operations must be atomic on the server; with redis they
/// are [`RENEW_SCRIPT`] and [`RELEASE_SCRIPT`] run through `EVAL`.
#[async_trait]
pub trait ExpiringKv: Send + Sync + 'static {
    /// The error type for store operations.
    type Error: StoreError;

    /// `SET key value NX PX ttl`. Returns `false` if the key exists.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Self::Error>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Resets the expiry of `key` to `ttl` if it holds `value`.
    async fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, Self::Error>;

    /// Deletes `key` if it holds `value`.
    async fn del_if_eq(&self, key: &str, value: &str) -> Result<bool, Self::Error>;
}

/// A lock held as an expiring key.
pub type RedisLock<C> = DistributedLock<RedisLocker<C>>;

/// Set-if-absent lock protocol over an [`ExpiringKv`].
///
/// The key holds the owner id. Finding our own owner id on acquisition
/// counts as already holding the lock, so every instance sharing an owner
/// id shares the lock.
#[derive(Clone, Debug)]
pub struct RedisLocker<C> {
    client: C,
}

impl<C: ExpiringKv> RedisLocker<C> {
    /// Creates a backend talking to the given store client.
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    /// Binds this backend to a lock configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn into_lock(self, config: LockConfig) -> Result<RedisLock<C>> {
        DistributedLock::new(self, config)
    }

    /// The underlying store client.
    pub const fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: ExpiringKv> LockBackend for RedisLocker<C> {
    type Lease = ();

    async fn acquire(&self, lock: &LockSpec) -> Result<()> {
        let set = self
            .client
            .set_nx(&lock.name, &lock.owner_id, lock.timeout)
            .await
            .map_err(|e| Error::backend("set", e))?;
        if set {
            return Ok(());
        }

        let holder = self
            .client
            .get(&lock.name)
            .await
            .map_err(|e| Error::backend("get", e))?;

        match holder {
            Some(owner) if owner == lock.owner_id => {
                let refreshed = self
                    .client
                    .expire_if_eq(&lock.name, &lock.owner_id, lock.timeout)
                    .await
                    .map_err(|e| Error::backend("expire", e))?;

                if refreshed {
                    debug!(lock = %lock.name, "re-entered lock already held by this owner");
                    Ok(())
                } else {
                    Err(Error::conflict(&lock.name, UNKNOWN_OWNER))
                }
            }
            Some(owner) => Err(Error::conflict(&lock.name, owner)),
            None => Err(Error::conflict(&lock.name, UNKNOWN_OWNER)),
        }
    }

    async fn renew(&self, lock: &LockSpec, _lease: &mut ()) -> Result<()> {
        let extended = self
            .client
            .expire_if_eq(&lock.name, &lock.owner_id, lock.timeout)
            .await
            .map_err(|e| Error::backend("expire", e))?;

        if extended {
            Ok(())
        } else {
            Err(Error::not_held(&lock.name, &lock.owner_id))
        }
    }

    async fn release(&self, lock: &LockSpec, _lease: ()) -> Result<()> {
        let deleted = self
            .client
            .del_if_eq(&lock.name, &lock.owner_id)
            .await
            .map_err(|e| Error::backend("del", e))?;

        if deleted {
            Ok(())
        } else {
            Err(Error::not_held(&lock.name, &lock.owner_id))
        }
    }

    async fn inspect(&self, lock: &LockSpec) -> Result<Option<String>> {
        self.client
            .get(&lock.name)
            .await
            .map_err(|e| Error::backend("get", e))
    }
}
