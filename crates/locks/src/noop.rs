use async_trait::async_trait;
use tracing::trace;

use crate::backend::{LockBackend, LockSpec};
use crate::config::LockConfig;
use crate::error::Result;
use crate::lock::DistributedLock;

/// A backend that grants every request, for local development.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBackend;

/// A locker that always succeeds.
pub type NoopLocker = DistributedLock<NoopBackend>;

impl NoopLocker {
    /// Creates a locker that never contends with anyone.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid.
    pub fn noop(config: LockConfig) -> Result<Self> {
        Self::new(NoopBackend, config)
    }
}

#[async_trait]
impl LockBackend for NoopBackend {
    type Lease = ();

    async fn acquire(&self, lock: &LockSpec) -> Result<()> {
        trace!(lock = %lock.name, "noop acquire");
        Ok(())
    }

    async fn renew(&self, lock: &LockSpec, _lease: &mut ()) -> Result<()> {
        trace!(lock = %lock.name, "noop renew");
        Ok(())
    }

    async fn release(&self, lock: &LockSpec, _lease: ()) -> Result<()> {
        trace!(lock = %lock.name, "noop release");
        Ok(())
    }

    async fn inspect(&self, _lock: &LockSpec) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LockPhase, LockStatus, Locker};

    #[tokio::test]
    async fn test_noop_locker_never_contends() {
        let a = NoopLocker::noop(LockConfig::new("jobs").with_owner_id("node-a")).unwrap();
        let b = NoopLocker::noop(LockConfig::new("jobs").with_owner_id("node-b")).unwrap();

        a.lock().await.unwrap();
        b.lock().await.unwrap();
        a.renew().await.unwrap();

        assert_eq!(a.phase(), LockPhase::Held);
        assert_eq!(b.status().await.unwrap(), LockStatus::Free);

        a.unlock().await.unwrap();
        b.unlock().await.unwrap();
        assert_eq!(a.phase(), LockPhase::Released);
    }
}
