use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::LockConfig;
use crate::error::Result;

/// The identity of one named lock as seen by one owner.
#[derive(Clone, Debug)]
pub struct LockSpec {
    /// Logical resource identifier.
    pub name: String,

    /// Identifier of the acquiring instance.
    pub owner_id: String,

    /// Lease duration.
    pub timeout: Duration,

    /// Wall-clock provider.
    pub clock: Arc<dyn Clock>,
}

impl LockSpec {
    /// The current time according to the configured clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The expiry a record written now should carry.
    #[must_use]
    pub fn expiry(&self) -> DateTime<Utc> {
        self.clock.deadline(self.timeout)
    }
}

impl From<&LockConfig> for LockSpec {
    fn from(config: &LockConfig) -> Self {
        Self {
            name: config.name.clone(),
            owner_id: config.owner_id.clone(),
            timeout: config.timeout,
            clock: Arc::clone(&config.clock),
        }
    }
}

/// The acquisition protocol of one backend family.
///
/// Implementations translate the lock protocol into store client
/// primitives. They hold no per-lock state of their own: whatever the
/// backend hands out on acquisition (a lease id, a session, a version token)
/// is returned as [`LockBackend::Lease`] and passed back on renewal and
/// release. Calls for one lock are serialized by the caller.
#[async_trait]
pub trait LockBackend: Send + Sync + 'static {
    /// Backend-side handle for a held lock.
    ///
    /// Kept so that a release failing in transit can be attempted again.
    type Lease: Clone + Send + Sync + 'static;

    /// Makes a single acquisition attempt.
    ///
    /// Fails with `Error::Conflict` if a live record belongs to another owner.
    async fn acquire(&self, lock: &LockSpec) -> Result<Self::Lease>;

    /// Extends a held lock without relinquishing it.
    ///
    /// Fails with `Error::NotHeld` if the record is gone or reassigned.
    async fn renew(&self, lock: &LockSpec, lease: &mut Self::Lease) -> Result<()>;

    /// Removes the record if it still belongs to this lease.
    ///
    /// Fails with `Error::NotHeld` if there was nothing of ours to remove.
    async fn release(&self, lock: &LockSpec, lease: Self::Lease) -> Result<()>;

    /// Reads the owner of the live record, if any.
    async fn inspect(&self, lock: &LockSpec) -> Result<Option<String>>;
}
