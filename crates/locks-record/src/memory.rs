use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Error;
use crate::store::{LockRecord, RecordStore};

/// In-memory document store for local development and tests.
///
/// Clones share the same collection. Like a real document store, expired
/// records stay in place until someone takes them over.
#[derive(Clone, Debug)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<HashMap<String, LockRecord>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
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

    async fn records(&self) -> Result<MutexGuard<'_, HashMap<String, LockRecord>>, Error> {
        if self.available.load(Ordering::SeqCst) {
            Ok(self.records.lock().await)
        } else {
            Err(Error::Unavailable)
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    type Error = Error;

    async fn insert(&self, record: &LockRecord) -> Result<bool, Error> {
        let mut records = self.records().await?;

        if records.contains_key(&record.name) {
            return Ok(false);
        }
        records.insert(record.name.clone(), record.clone());

        Ok(true)
    }

    async fn find(&self, name: &str) -> Result<Option<LockRecord>, Error> {
        Ok(self.records().await?.get(name).cloned())
    }

    async fn take_over(
        &self,
        name: &str,
        owner_id: &str,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut records = self.records().await?;

        match records.get_mut(name) {
            Some(record) if record.expired_at <= now || record.owner_id == owner_id => {
                record.owner_id = owner_id.to_string();
                record.expired_at = expired_at;
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(
        &self,
        name: &str,
        owner_id: &str,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut records = self.records().await?;

        match records.get_mut(name) {
            Some(record) if record.owner_id == owner_id => {
                record.expired_at = expired_at;
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, name: &str, owner_id: &str) -> Result<bool, Error> {
        let mut records = self.records().await?;

        if records.get(name).is_some_and(|record| record.owner_id == owner_id) {
            records.remove(name);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
