//! Compare-and-swap distributed locks.
//!
//! The lock is a single key holding the owner id, created with an atomic
//! set-if-absent and an expiry. Renewal and release are conditional on the
//! key still being ours:
//!
//! - [`RedisLocker`] compares the stored owner id inside a server-side
//!   script ([`RENEW_SCRIPT`], [`RELEASE_SCRIPT`]).
//! - [`MemcachedLocker`] compares the item's cas token.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod memcached;
mod memory;
mod redis;

pub use error::Error as MemoryKvError;
pub use memcached::{
    MAX_RELATIVE_EXPIRATION, MemcachedLock, MemcachedLocker, Versioned, VersionedKv,
};
pub use memory::{MemoryExpiringKv, MemoryVersionedKv};
pub use redis::{ExpiringKv, RELEASE_SCRIPT, RENEW_SCRIPT, RedisLock, RedisLocker};
