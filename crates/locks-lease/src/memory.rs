use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distlock::{Clock, SystemClock};
use tokio::sync::Mutex;

use crate::client::{LeaseClient, LeaseId, LeasedValue};
use crate::error::Error;

/// In-memory (single process) lease store for local development and tests.
///
/// Clones share the same keyspace. Expiry is evaluated lazily against the
/// configured clock on every call.
#[derive(Clone, Debug)]
pub struct MemoryLeaseStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    available: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct State {
    last_lease: i64,
    leases: HashMap<LeaseId, Grant>,
    keys: HashMap<String, LeasedValue>,
}

#[derive(Debug)]
struct Grant {
    ttl_secs: i64,
    expires_at: DateTime<Utc>,
}

impl State {
    fn sweep(&mut self, now: DateTime<Utc>) {
        self.leases.retain(|_, grant| grant.expires_at > now);

        let leases = &self.leases;
        self.keys.retain(|_, entry| leases.contains_key(&entry.lease));
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLeaseStore {
    /// Creates an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates an empty store using the given clock.
    #[must_use]
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock: Arc::new(clock),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes every subsequent call fail with [`Error::Unavailable`].
    pub fn disconnect(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    /// Undoes [`Self::disconnect`].
    pub fn reconnect(&self) {
        self.available.store(true, Ordering::SeqCst);
    }

    /// Number of live leases.
    pub async fn lease_count(&self) -> usize {
        self.lock_swept().await.leases.len()
    }

    /// Expiry of the lease `key` is attached to, if the key is live.
    pub async fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        let state = self.lock_swept().await;
        let entry = state.keys.get(key)?;
        state.leases.get(&entry.lease).map(|grant| grant.expires_at)
    }

    async fn lock_swept(&self) -> tokio::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().await;
        state.sweep(self.clock.now());
        state
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unavailable)
        }
    }

    fn expires_at(&self, ttl_secs: i64) -> DateTime<Utc> {
        self.clock
            .deadline(Duration::from_secs(ttl_secs.unsigned_abs()))
    }
}

#[async_trait]
impl LeaseClient for MemoryLeaseStore {
    type Error = Error;

    async fn grant(&self, ttl_secs: i64) -> Result<LeaseId, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        state.last_lease += 1;
        let lease = LeaseId(state.last_lease);
        state.leases.insert(
            lease,
            Grant {
                ttl_secs,
                expires_at: self.expires_at(ttl_secs),
            },
        );

        Ok(lease)
    }

    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId) -> Result<bool, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        if state.keys.contains_key(key) || !state.leases.contains_key(&lease) {
            return Ok(false);
        }

        state.keys.insert(
            key.to_string(),
            LeasedValue {
                value: value.to_string(),
                lease,
            },
        );

        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<LeasedValue>, Error> {
        self.check_available()?;
        let state = self.lock_swept().await;

        Ok(state.keys.get(key).cloned())
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<Option<i64>, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        let Some(grant) = state.leases.get_mut(&lease) else {
            return Ok(None);
        };
        grant.expires_at = self.expires_at(grant.ttl_secs);

        Ok(Some(grant.ttl_secs))
    }

    async fn delete_if_leased(&self, key: &str, lease: LeaseId) -> Result<bool, Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        if state.keys.get(key).is_some_and(|entry| entry.lease == lease) {
            state.keys.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), Error> {
        self.check_available()?;
        let mut state = self.lock_swept().await;

        state.leases.remove(&lease);
        state.keys.retain(|_, entry| entry.lease != lease);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distlock::TokioClock;

    #[tokio::test(start_paused = true)]
    async fn test_keys_vanish_with_their_lease() {
        let store = MemoryLeaseStore::with_clock(TokioClock::new());

        let lease = store.grant(2).await.unwrap();
        assert!(store.put_if_absent("jobs", "node-a", lease).await.unwrap());
        assert!(!store.put_if_absent("jobs", "node-b", lease).await.unwrap());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(store.keep_alive_once(lease).await.unwrap(), Some(2));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(store.get("jobs").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.get("jobs").await.unwrap().is_none());
        assert_eq!(store.keep_alive_once(lease).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revoke_deletes_attached_keys() {
        let store = MemoryLeaseStore::new();

        let lease = store.grant(10).await.unwrap();
        store.put_if_absent("jobs", "node-a", lease).await.unwrap();
        store.revoke(lease).await.unwrap();

        assert!(store.get("jobs").await.unwrap().is_none());
        assert_eq!(store.lease_count().await, 0);
        assert!(store.revoke(lease).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let store = MemoryLeaseStore::new();

        store.disconnect();
        assert!(store.grant(10).await.is_err());

        store.reconnect();
        assert!(store.grant(10).await.is_ok());
    }
}
