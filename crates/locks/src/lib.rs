//! Mutual exclusion across processes that share nothing but a coordination
//! store.
//!
//! A [`Locker`] represents one owner's view of one named lock. Backends
//! implement the narrower [`LockBackend`] protocol and are wrapped in a
//! [`DistributedLock`], which serializes operations, keeps the lease alive in
//! the background and reports phases and events.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod backend;
mod clock;
mod config;
mod error;
mod lock;
mod noop;
mod phase;
mod retry;

pub use backend::{LockBackend, LockSpec};
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{
    DEFAULT_LOCK_NAME, DEFAULT_LOCK_TIMEOUT, DEFAULT_OPERATION_TIMEOUT, LockConfig,
    default_owner_id,
};
pub use error::{Error, Result, StoreError, UNKNOWN_OWNER};
pub use lock::DistributedLock;
pub use noop::{NoopBackend, NoopLocker};
pub use phase::{LockEvent, LockPhase, LockStatus};
pub use retry::{RetryPolicy, lock_with_retry};

use async_trait::async_trait;

/// A distributed lock held on behalf of one owner.
///
/// `lock` makes a single acquisition attempt and never waits for the lock to
/// become free; see [`lock_with_retry`] for the polling pattern. None of the
/// operations retry on their own.
#[async_trait]
pub trait Locker: Send + Sync {
    /// The lock name.
    fn name(&self) -> &str;

    /// The owner identifier this locker acquires as.
    fn owner_id(&self) -> &str;

    /// Attempts to acquire the lock once.
    ///
    /// On success the lock is kept alive in the background until `unlock`.
    /// Returns `Error::Conflict` naming the holder if another owner has it.
    async fn lock(&self) -> Result<()>;

    /// Stops renewing and releases the lock.
    ///
    /// Succeeds without contacting the backend if the lock is not held.
    /// Returns `Error::NotHeld` if the backend record had already expired or
    /// been reassigned.
    async fn unlock(&self) -> Result<()>;

    /// Extends the lock without releasing it.
    ///
    /// Returns `Error::NotHeld` if this owner does not hold the lock.
    async fn renew(&self) -> Result<()>;

    /// Reports who holds the lock according to the backend.
    async fn status(&self) -> Result<LockStatus>;
}
