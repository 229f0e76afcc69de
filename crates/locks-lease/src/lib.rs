//! Lease-based (etcd-like) distributed locks.
//!
//! Acquisition grants a lease of the lock timeout and writes the lock key
//! attached to it, only if the key does not exist. Renewal keeps the lease
//! alive; the key itself is never rewritten. If the holder stops renewing,
//! the store deletes the key when the lease runs out.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
mod memory;

pub use client::{LeaseClient, LeaseId, LeasedValue};
pub use error::Error as MemoryLeaseError;
pub use memory::MemoryLeaseStore;

use std::time::Duration;

use async_trait::async_trait;
use distlock::{DistributedLock, Error, LockBackend, LockConfig, LockSpec, Result, UNKNOWN_OWNER};
use tracing::{debug, warn};

/// A lock backed by a lease store.
pub type LeaseLock<C> = DistributedLock<LeaseLocker<C>>;

/// Lease-based lock protocol over a [`LeaseClient`].
#[derive(Clone, Debug)]
pub struct LeaseLocker<C> {
    client: C,
}

impl<C: LeaseClient> LeaseLocker<C> {
    /// Creates a backend talking to the given store client.
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    /// Binds this backend to a lock configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn into_lock(self, config: LockConfig) -> Result<LeaseLock<C>> {
        DistributedLock::new(self, config)
    }

    /// The underlying store client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Revokes a lease granted for an attempt that did not go through.
    async fn discard(&self, lease: LeaseId) {
        if let Err(err) = self.client.revoke(lease).await {
            warn!(lease = lease.0, error = %err, "failed to revoke unused lease");
        }
    }
}

/// Lease TTLs are whole seconds; round up so the lease never undercuts the timeout.
fn ttl_secs(timeout: Duration) -> i64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}

#[async_trait]
impl<C: LeaseClient> LockBackend for LeaseLocker<C> {
    type Lease = LeaseId;

    async fn acquire(&self, lock: &LockSpec) -> Result<LeaseId> {
        let lease = self
            .client
            .grant(ttl_secs(lock.timeout))
            .await
            .map_err(|e| Error::backend("grant", e))?;

        match self
            .client
            .put_if_absent(&lock.name, &lock.owner_id, lease)
            .await
        {
            Ok(true) => {
                debug!(lock = %lock.name, lease = lease.0, "lock key written under lease");
                Ok(lease)
            }
            Ok(false) => {
                self.discard(lease).await;
                let owner = self
                    .client
                    .get(&lock.name)
                    .await
                    .map_err(|e| Error::backend("get", e))?
                    .map_or_else(|| UNKNOWN_OWNER.to_string(), |entry| entry.value);
                Err(Error::conflict(&lock.name, owner))
            }
            Err(err) => {
                self.discard(lease).await;
                Err(Error::backend("put", err))
            }
        }
    }

    async fn renew(&self, lock: &LockSpec, lease: &mut LeaseId) -> Result<()> {
        match self
            .client
            .keep_alive_once(*lease)
            .await
            .map_err(|e| Error::backend("keep_alive", e))?
        {
            Some(ttl) => {
                debug!(lock = %lock.name, lease = lease.0, ttl, "lease kept alive");
                Ok(())
            }
            None => Err(Error::not_held(&lock.name, &lock.owner_id)),
        }
    }

    async fn release(&self, lock: &LockSpec, lease: LeaseId) -> Result<()> {
        let deleted = self
            .client
            .delete_if_leased(&lock.name, lease)
            .await
            .map_err(|e| Error::backend("delete", e))?;

        self.client
            .revoke(lease)
            .await
            .map_err(|e| Error::backend("revoke", e))?;

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
            .map(|entry| entry.value))
    }
}
