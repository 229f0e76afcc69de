use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distlock::{Clock, SystemClock};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Error;
use crate::memcached::{Versioned, VersionedKv};
use crate::redis::ExpiringKv;

#[derive(Debug)]
struct Item {
    value: String,
    cas: u64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Items {
    last_cas: u64,
    entries: HashMap<String, Item>,
}

impl Items {
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&mut Item> {
        if self.entries.get(key).is_some_and(|item| item.expires_at <= now) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn next_cas(&mut self) -> u64 {
        self.last_cas += 1;
        self.last_cas
    }
}

/// Keyspace shared by the in-memory stores.
#[derive(Clone, Debug)]
struct Shared {
    items: Arc<Mutex<Items>>,
    clock: Arc<dyn Clock>,
    available: Arc<AtomicBool>,
}

impl Shared {
    fn new(clock: impl Clock) -> Self {
        Self {
            items: Arc::new(Mutex::new(Items::default())),
            clock: Arc::new(clock),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    async fn items(&self) -> Result<MutexGuard<'_, Items>, Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(self.items.lock().await)
        } else {
            Err(Error::Unavailable)
        }
    }

    async fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.items.lock().await.live(key, now).map(|item| item.expires_at)
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

/// In-memory redis-like store for local development and tests.
///
/// Clones share the same keyspace.
#[derive(Clone, Debug)]
pub struct MemoryExpiringKv {
    shared: Shared,
}

impl Default for MemoryExpiringKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryExpiringKv {
    /// Creates an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates an empty store using the given clock.
    #[must_use]
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            shared: Shared::new(clock),
        }
    }

    /// Makes every subsequent call fail with [`Error::Unavailable`].
    pub fn disconnect(&self) {
        self.shared.set_available(false);
    }

    /// Undoes [`Self::disconnect`].
    pub fn reconnect(&self) {
        self.shared.set_available(true);
    }

    /// When `key` expires, if it is live.
    pub async fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        self.shared.expiry(key).await
    }
}

#[async_trait]
impl ExpiringKv for MemoryExpiringKv {
    type Error = Error;

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        if items.live(key, now).is_some() {
            return Ok(false);
        }

        let cas = items.next_cas();
        items.entries.insert(
            key.to_string(),
            Item {
                value: value.to_string(),
                cas,
                expires_at: self.shared.clock.deadline(ttl),
            },
        );

        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        Ok(items.live(key, now).map(|item| item.value.clone()))
    }

    async fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        match items.live(key, now) {
            Some(item) if item.value == value => {
                item.expires_at = self.shared.clock.deadline(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> Result<bool, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        if items.live(key, now).is_some_and(|item| item.value == value) {
            items.entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// In-memory memcached-like store for local development and tests.
///
/// Clones share the same keyspace.
#[derive(Clone, Debug)]
pub struct MemoryVersionedKv {
    shared: Shared,
}

impl Default for MemoryVersionedKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVersionedKv {
    /// Creates an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Creates an empty store using the given clock.
    #[must_use]
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            shared: Shared::new(clock),
        }
    }

    /// Makes every subsequent call fail with [`Error::Unavailable`].
    pub fn disconnect(&self) {
        self.shared.set_available(false);
    }

    /// Undoes [`Self::disconnect`].
    pub fn reconnect(&self) {
        self.shared.set_available(true);
    }

    /// When `key` expires, if it is live.
    pub async fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        self.shared.expiry(key).await
    }
}

#[async_trait]
impl VersionedKv for MemoryVersionedKv {
    type Error = Error;

    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<Option<u64>, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        if items.live(key, now).is_some() {
            return Ok(None);
        }

        let cas = items.next_cas();
        items.entries.insert(
            key.to_string(),
            Item {
                value: value.to_string(),
                cas,
                expires_at: self.shared.clock.deadline(ttl),
            },
        );

        Ok(Some(cas))
    }

    async fn gets(&self, key: &str) -> Result<Option<Versioned>, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        Ok(items.live(key, now).map(|item| Versioned {
            value: item.value.clone(),
            cas: item.cas,
        }))
    }

    async fn cas(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        cas: u64,
    ) -> Result<Option<u64>, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        if !items.live(key, now).is_some_and(|item| item.cas == cas) {
            return Ok(None);
        }

        let next = items.next_cas();
        let expires_at = self.shared.clock.deadline(ttl);
        if let Some(item) = items.entries.get_mut(key) {
            item.value = value.to_string();
            item.cas = next;
            item.expires_at = expires_at;
        }

        Ok(Some(next))
    }

    async fn delete_cas(&self, key: &str, cas: u64) -> Result<bool, Error> {
        let mut items = self.shared.items().await?;
        let now = self.shared.clock.now();

        if items.live(key, now).is_some_and(|item| item.cas == cas) {
            items.entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distlock::TokioClock;

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_expiry() {
        let store = MemoryExpiringKv::with_clock(TokioClock::new());

        assert!(store.set_nx("reports", "node-a", Duration::from_secs(2)).await.unwrap());
        assert!(!store.set_nx("reports", "node-b", Duration::from_secs(2)).await.unwrap());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get("reports").await.unwrap().is_none());
        assert!(store.set_nx("reports", "node-b", Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_conditional_ops_compare_values() {
        let store = MemoryExpiringKv::new();
        let ttl = Duration::from_secs(10);

        store.set_nx("reports", "node-a", ttl).await.unwrap();

        assert!(!store.expire_if_eq("reports", "node-b", ttl).await.unwrap());
        assert!(!store.del_if_eq("reports", "node-b").await.unwrap());
        assert!(store.expire_if_eq("reports", "node-a", ttl).await.unwrap());
        assert!(store.del_if_eq("reports", "node-a").await.unwrap());
        assert!(store.get("reports").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cas_tokens_change_on_write() {
        let store = MemoryVersionedKv::new();
        let ttl = Duration::from_secs(10);

        let first = store.add("reports", "node-a", ttl).await.unwrap().unwrap();
        assert_eq!(store.add("reports", "node-b", ttl).await.unwrap(), None);

        let second = store.cas("reports", "node-a", ttl, first).await.unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(store.cas("reports", "node-b", ttl, first).await.unwrap(), None);

        assert!(!store.delete_cas("reports", first).await.unwrap());
        assert!(store.delete_cas("reports", second).await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let store = MemoryVersionedKv::new();

        store.disconnect();
        assert!(store.gets("reports").await.is_err());

        store.reconnect();
        assert!(store.gets("reports").await.unwrap().is_none());
    }
}
