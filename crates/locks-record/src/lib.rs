//! Distributed locks persisted as records in a transactional store.
//!
//! A lock is a row (or document) keyed uniquely by name, holding the owner
//! id and an expiry. Nothing deletes expired records; a new owner takes
//! over a record once its expiry has passed.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod memory;
mod sql;
mod store;

pub use error::Error as RecordStoreError;
pub use memory::MemoryRecordStore;
pub use sql::SqlRecordStore;
pub use store::{LockRecord, RecordStore};

use async_trait::async_trait;
use distlock::{DistributedLock, Error, LockBackend, LockConfig, LockSpec, Result, UNKNOWN_OWNER};
use tracing::{debug, info};

/// A lock held as a persisted record.
pub type RecordLock<S> = DistributedLock<RecordLocker<S>>;

/// Insert-or-take-over lock protocol over a [`RecordStore`].
///
/// Acquisition inserts a fresh record; if the name exists it takes the
/// record over when it has expired or already names this owner. Renewal
/// and release only touch a record still naming this owner.
#[derive(Clone, Debug)]
pub struct RecordLocker<S> {
    store: S,
}

impl<S: RecordStore> RecordLocker<S> {
    /// Creates a backend over the given store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Binds this backend to a lock configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn into_lock(self, config: LockConfig) -> Result<RecordLock<S>> {
        DistributedLock::new(self, config)
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: RecordStore> LockBackend for RecordLocker<S> {
    type Lease = ();

    async fn acquire(&self, lock: &LockSpec) -> Result<()> {
        let now = lock.now();
        let expired_at = lock.expiry();

        let record = LockRecord {
            name: lock.name.clone(),
            owner_id: lock.owner_id.clone(),
            expired_at,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .store
            .insert(&record)
            .await
            .map_err(|e| Error::backend("insert", e))?;
        if inserted {
            debug!(lock = %lock.name, %expired_at, "lock record inserted");
            return Ok(());
        }

        let taken = self
            .store
            .take_over(&lock.name, &lock.owner_id, expired_at, now)
            .await
            .map_err(|e| Error::backend("take_over", e))?;
        if taken {
            info!(lock = %lock.name, %expired_at, "took over expired or own lock record");
            return Ok(());
        }

        let owner = self
            .store
            .find(&lock.name)
            .await
            .map_err(|e| Error::backend("find", e))?
            .map_or_else(|| UNKNOWN_OWNER.to_string(), |record| record.owner_id);
        Err(Error::conflict(&lock.name, owner))
    }

    async fn renew(&self, lock: &LockSpec, _lease: &mut ()) -> Result<()> {
        let extended = self
            .store
            .extend(&lock.name, &lock.owner_id, lock.expiry(), lock.now())
            .await
            .map_err(|e| Error::backend("extend", e))?;

        if extended {
            Ok(())
        } else {
            Err(Error::not_held(&lock.name, &lock.owner_id))
        }
    }

    async fn release(&self, lock: &LockSpec, _lease: ()) -> Result<()> {
        let removed = self
            .store
            .remove(&lock.name, &lock.owner_id)
            .await
            .map_err(|e| Error::backend("remove", e))?;

        if removed {
            Ok(())
        } else {
            Err(Error::not_held(&lock.name, &lock.owner_id))
        }
    }

    async fn inspect(&self, lock: &LockSpec) -> Result<Option<String>> {
        let record = self
            .store
            .find(&lock.name)
            .await
            .map_err(|e| Error::backend("find", e))?;

        let now = lock.now();
        Ok(record
            .filter(|record| record.expired_at > now)
            .map(|record| record.owner_id))
    }
}
