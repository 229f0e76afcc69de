use async_trait::async_trait;
use distlock::StoreError;

/// Identifier of a backend lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeaseId(pub i64);

/// A value and the lease it is attached to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeasedValue {
    /// The stored value.
    pub value: String,

    /// The lease keeping the key alive.
    pub lease: LeaseId,
}

/// The primitives of an etcd-like store with leases.
///
/// Keys attached to a lease are deleted by the store when the lease expires
/// or is revoked.
#[async_trait]
pub trait LeaseClient: Send + Sync + 'static {
    /// The error type for store operations.
    type Error: StoreError;

    /// Grants a lease expiring after `ttl_secs` unless kept alive.
    async fn grant(&self, ttl_secs: i64) -> Result<LeaseId, Self::Error>;

    /// Writes `key = value` attached to `lease` if the key does not exist.
    ///
    /// Returns `false` without writing if the key exists. With etcd this is a
    /// transaction comparing the key's create revision to zero.
    async fn put_if_absent(&self, key: &str, value: &str, lease: LeaseId)
    -> Result<bool, Self::Error>;

    /// Reads a key.
    async fn get(&self, key: &str) -> Result<Option<LeasedValue>, Self::Error>;

    /// Refreshes a lease to its full TTL.
    ///
    /// Returns the new TTL in seconds, or `None` if the lease no longer exists.
    async fn keep_alive_once(&self, lease: LeaseId) -> Result<Option<i64>, Self::Error>;

    /// Deletes `key` if it is attached to `lease`.
    ///
    /// Returns `false` if the key is missing or attached to another lease.
    /// With etcd this is a transaction comparing the key's lease.
    async fn delete_if_leased(&self, key: &str, lease: LeaseId) -> Result<bool, Self::Error>;

    /// Revokes a lease and every key attached to it. Unknown leases are ignored.
    async fn revoke(&self, lease: LeaseId) -> Result<(), Self::Error>;
}
