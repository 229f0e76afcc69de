use async_trait::async_trait;
use chrono::{DateTime, Utc};
use distlock::StoreError;

/// A persisted lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRecord {
    /// Lock name, unique in the store.
    pub name: String,

    /// Current holder.
    pub owner_id: String,

    /// When the holder's claim lapses unless extended.
    pub expired_at: DateTime<Utc>,

    /// When the record was first inserted.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// The primitives of a transactional record store keyed by lock name.
///
/// Every conditional operation must be a single atomic statement (or run in
/// one transaction) on the store.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// The error type for store operations.
    type Error: StoreError;

    /// Inserts a record. Returns `false` if a record with the name exists.
    async fn insert(&self, record: &LockRecord) -> Result<bool, Self::Error>;

    /// Reads a record by name.
    async fn find(&self, name: &str) -> Result<Option<LockRecord>, Self::Error>;

    /// Hands the record to `owner_id` if it has expired at `now` or is
    /// already held by `owner_id`.
    async fn take_over(
        &self,
        name: &str,
        owner_id: &str,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Self::Error>;

    /// Moves the expiry of a record held by `owner_id`.
    async fn extend(
        &self,
        name: &str,
        owner_id: &str,
        expired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Self::Error>;

    /// Deletes a record held by `owner_id`.
    async fn remove(&self, name: &str, owner_id: &str) -> Result<bool, Self::Error>;
}
