//! NATS `JetStream` KV store client for compare-and-swap locks.
//!
//! [`NatsKv`] implements [`VersionedKv`] on a KV bucket: the key revision
//! is the cas token and the bucket's `max_age` is the item expiry. Pair it
//! with [`distlock_cas::MemcachedLocker`]; set the bucket TTL to the lock
//! timeout.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_nats::Client;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::kv::{
    Config as KvConfig, CreateErrorKind, DeleteErrorKind, Entry, Operation, Store as KvStore,
    UpdateErrorKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use distlock_cas::{Versioned, VersionedKv};
use tokio::sync::OnceCell;
use tracing::{debug, error, instrument, warn};

/// Configuration for [`NatsKv`].
#[derive(Clone, Debug)]
pub struct NatsKvConfig {
    /// The bucket to use for the key-value store.
    pub bucket: String,

    /// The NATS client to use.
    pub client: Client,

    /// Number of replicas for the KV store. Should be set to at least 3 in production for HA.
    pub num_replicas: usize,

    /// Whether to persist the locks to disk.
    pub persist: bool,

    /// Age after which an unrenewed key disappears from the bucket.
    pub ttl: Duration,

    /// Timeout for individual NATS `JetStream` operations. Defaults to 10 seconds if not set.
    pub operation_timeout: Option<Duration>,

    /// Maximum number of attempts for failed operations. Defaults to 3 if not set.
    pub max_retries: Option<usize>,

    /// Base delay for exponential backoff between retries. Defaults to 100ms if not set.
    pub retry_base_delay: Option<Duration>,

    /// Maximum delay for exponential backoff. Defaults to 5 seconds if not set.
    pub retry_max_delay: Option<Duration>,
}

/// A [`VersionedKv`] backed by a NATS `JetStream` KV bucket.
#[derive(Clone, Debug)]
pub struct NatsKv {
    bucket: String,
    jetstream_context: JetStreamContext,
    store: Arc<OnceCell<KvStore>>,
    ttl: Duration,
    num_replicas: usize,
    persist: bool,
    operation_timeout: Duration,
    max_retries: usize,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl NatsKv {
    /// Creates a new instance of `NatsKv`. The KV bucket is created or
    /// bound lazily on first use.
    #[must_use]
    pub fn new(
        NatsKvConfig {
            bucket,
            client,
            num_replicas,
            persist,
            ttl,
            operation_timeout,
            max_retries,
            retry_base_delay,
            retry_max_delay,
        }: NatsKvConfig,
    ) -> Self {
        Self {
            bucket,
            jetstream_context: async_nats::jetstream::new(client),
            store: Arc::new(OnceCell::new()),
            ttl,
            num_replicas,
            persist,
            operation_timeout: operation_timeout.unwrap_or(Duration::from_secs(10)),
            max_retries: max_retries.unwrap_or(3).max(1),
            retry_base_delay: retry_base_delay.unwrap_or(Duration::from_millis(100)),
            retry_max_delay: retry_max_delay.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Executes an operation with retry logic and exponential backoff.
    ///
    /// Expected outcomes such as "key exists" must be mapped to `Ok` by the
    /// operation itself; only transport failures are retried.
    async fn with_retry<F, Fut, R, E>(
        &self,
        operation_name: &'static str,
        operation: F,
    ) -> Result<R, Error>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, E>> + Send,
        E: Into<Error> + std::fmt::Display + Send,
    {
        let mut attempts = 0;
        let mut delay = self.retry_base_delay;

        loop {
            attempts += 1;

            match tokio::time::timeout(self.operation_timeout, operation()).await {
                Ok(Ok(result)) => {
                    if attempts > 1 {
                        debug!(
                            operation = operation_name,
                            attempts, "operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    let error_str = e.to_string();

                    if !error::is_retriable(&error_str) {
                        debug!(
                            operation = operation_name,
                            error = %error_str,
                            "operation failed with non-retriable error"
                        );
                        return Err(e.into());
                    }

                    if attempts >= self.max_retries {
                        error!(
                            operation = operation_name,
                            attempts,
                            error = %error_str,
                            "operation failed after maximum retries"
                        );
                        return Err(Error::MaxRetriesExceeded {
                            max_attempts: self.max_retries,
                            last_error: error_str,
                        });
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempts,
                        max_attempts = self.max_retries,
                        delay = ?delay,
                        error = %error_str,
                        "operation failed, retrying"
                    );
                }
                Err(_elapsed) => {
                    if attempts >= self.max_retries {
                        error!(
                            operation = operation_name,
                            attempts,
                            timeout = ?self.operation_timeout,
                            "operation timed out after maximum retries"
                        );
                        return Err(Error::Timeout {
                            attempts,
                            after: self.operation_timeout,
                        });
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempts,
                        timeout = ?self.operation_timeout,
                        delay = ?delay,
                        "operation timed out, retrying"
                    );
                }
            }

            tokio::time::sleep(delay).await;

            // Exponential backoff with 0-10% jitter
            delay = std::cmp::min(
                delay.mul_f64(fastrand::f64().mul_add(0.1, 2.0)),
                self.retry_max_delay,
            );
        }
    }

    /// Gets or creates the KV store for the configured bucket.
    async fn kv_store(&self) -> Result<KvStore, Error> {
        let kv_config = KvConfig {
            bucket: self.bucket.clone(),
            max_age: self.ttl,
            num_replicas: self.num_replicas,
            storage: if self.persist {
                async_nats::jetstream::stream::StorageType::File
            } else {
                async_nats::jetstream::stream::StorageType::Memory
            },
            ..Default::default()
        };

        self.store
            .get_or_try_init(|| {
                self.with_retry("create_or_update_kv", || {
                    let jetstream_context = self.jetstream_context.clone();
                    let config = kv_config.clone();
                    async move { jetstream_context.create_or_update_key_value(config).await }
                })
            })
            .await
            .cloned()
    }

    async fn entry(&self, kv: &KvStore, key: &str) -> Result<Option<Entry>, Error> {
        self.with_retry("kv_entry", || {
            let kv = kv.clone();
            async move { kv.entry(key).await }
        })
        .await
    }

    async fn update(
        &self,
        kv: &KvStore,
        key: &str,
        value: Bytes,
        revision: u64,
    ) -> Result<Option<u64>, Error> {
        self.with_retry("kv_update", || {
            let kv = kv.clone();
            let value = value.clone();
            async move {
                match kv.update(key, value, revision).await {
                    Ok(revision) => Ok(Some(revision)),
                    Err(e) if e.kind() == UpdateErrorKind::WrongLastRevision => Ok(None),
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    fn check_ttl(&self, key: &str, ttl: Duration) {
        if ttl > self.ttl {
            warn!(
                bucket = %self.bucket,
                key,
                requested = ?ttl,
                max_age = ?self.ttl,
                "bucket max age is shorter than the requested expiry"
            );
        }
    }
}

/// Deleted and purged keys leave a marker entry behind.
fn is_live(entry: &Entry) -> bool {
    entry.operation == Operation::Put && !entry.value.is_empty()
}

#[async_trait]
impl VersionedKv for NatsKv {
    type Error = Error;

    #[instrument(skip(self, value), fields(bucket = %self.bucket))]
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<Option<u64>, Error> {
        self.check_ttl(key, ttl);
        let kv = self.kv_store().await?;
        let value = Bytes::from(value.to_string());

        let created = self
            .with_retry("kv_create", || {
                let kv = kv.clone();
                let value = value.clone();
                async move {
                    match kv.create(key, value).await {
                        Ok(revision) => Ok(Some(revision)),
                        Err(e) if e.kind() == CreateErrorKind::AlreadyExists => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        if created.is_some() {
            return Ok(created);
        }

        match self.entry(&kv, key).await? {
            Some(entry) if !is_live(&entry) => {
                debug!(key, revision = entry.revision, "found tombstone, updating it to acquire");
                self.update(&kv, key, value, entry.revision).await
            }
            _ => Ok(None),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn gets(&self, key: &str) -> Result<Option<Versioned>, Error> {
        let kv = self.kv_store().await?;

        Ok(self
            .entry(&kv, key)
            .await?
            .filter(is_live)
            .map(|entry| Versioned {
                value: String::from_utf8_lossy(&entry.value).into_owned(),
                cas: entry.revision,
            }))
    }

    #[instrument(skip(self, value), fields(bucket = %self.bucket))]
    async fn cas(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        cas: u64,
    ) -> Result<Option<u64>, Error> {
        self.check_ttl(key, ttl);
        let kv = self.kv_store().await?;

        self.update(&kv, key, Bytes::from(value.to_string()), cas)
            .await
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete_cas(&self, key: &str, cas: u64) -> Result<bool, Error> {
        let kv = self.kv_store().await?;

        self.with_retry("kv_delete", || {
            let kv = kv.clone();
            async move {
                match kv.delete_expect_revision(key, Some(cas)).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == DeleteErrorKind::WrongLastRevision => Ok(false),
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_nats::connect;
    use distlock::{LockConfig, LockStatus, Locker};
    use distlock_cas::{MemcachedLock, MemcachedLocker};
    use uuid::Uuid;

    async fn test_kv(prefix: &str, ttl: Duration) -> (Client, NatsKv) {
        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let client = connect(&nats_url)
            .await
            .expect("Failed to connect to NATS for tests");
        let bucket = format!("test_locks_{}_{}", prefix, Uuid::new_v4().as_hyphenated());

        let kv = NatsKv::new(NatsKvConfig {
            bucket,
            client: client.clone(),
            num_replicas: 1,
            persist: false,
            ttl,
            operation_timeout: None,
            max_retries: None,
            retry_base_delay: None,
            retry_max_delay: None,
        });

        (client, kv)
    }

    fn lock_for(kv: &NatsKv, owner: &str, timeout: Duration) -> MemcachedLock<NatsKv> {
        MemcachedLocker::new(kv.clone())
            .into_lock(
                LockConfig::new("my_resource")
                    .with_owner_id(owner)
                    .with_timeout(timeout),
            )
            .unwrap()
    }

    async fn cleanup(client: Client, kv: &NatsKv) {
        let js_context = async_nats::jetstream::new(client);
        js_context.delete_key_value(kv.bucket()).await.ok();
    }

    #[tokio::test]
    #[ignore = "requires a NATS server at NATS_URL"]
    async fn test_revisions_guard_updates() {
        let (client, kv) = test_kv("revisions", Duration::from_secs(60)).await;
        let ttl = Duration::from_secs(60);

        let first = kv.add("key", "node-a", ttl).await.unwrap().unwrap();
        assert_eq!(kv.add("key", "node-b", ttl).await.unwrap(), None);

        let second = kv.cas("key", "node-a", ttl, first).await.unwrap().unwrap();
        assert_eq!(kv.cas("key", "node-a", ttl, first).await.unwrap(), None);
        assert!(!kv.delete_cas("key", first).await.unwrap());
        assert!(kv.delete_cas("key", second).await.unwrap());

        assert!(kv.gets("key").await.unwrap().is_none());
        assert!(kv.add("key", "node-b", ttl).await.unwrap().is_some());

        cleanup(client, &kv).await;
    }

    #[tokio::test]
    #[ignore = "requires a NATS server at NATS_URL"]
    async fn test_lock_conflict_and_handover() {
        let (client, kv) = test_kv("handover", Duration::from_secs(60)).await;
        let a = lock_for(&kv, "node-a", Duration::from_secs(60));
        let b = lock_for(&kv, "node-b", Duration::from_secs(60));

        a.lock().await.unwrap();
        assert_matches!(
            b.lock().await,
            Err(distlock::Error::Conflict { owner, .. }) if owner == "node-a"
        );
        assert_eq!(b.status().await.unwrap(), LockStatus::HeldByOther("node-a".into()));

        a.unlock().await.unwrap();
        b.lock().await.unwrap();
        assert_eq!(b.status().await.unwrap(), LockStatus::HeldBySelf);

        b.unlock().await.unwrap();
        cleanup(client, &kv).await;
    }

    #[tokio::test]
    #[ignore = "requires a NATS server at NATS_URL"]
    async fn test_crashed_holder_expires() {
        let (client, kv) = test_kv("expiry", Duration::from_secs(2)).await;
        let a = lock_for(&kv, "node-a", Duration::from_secs(2));
        let b = lock_for(&kv, "node-b", Duration::from_secs(2));

        a.lock().await.unwrap();
        drop(a);

        assert!(b.lock().await.is_err());

        tokio::time::sleep(Duration::from_secs(4)).await;
        b.lock().await.unwrap();

        b.unlock().await.unwrap();
        cleanup(client, &kv).await;
    }
}
