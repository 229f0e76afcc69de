use distlock::StoreError;
use thiserror::Error;

/// Errors returned by the in-memory lease store.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The store was disconnected with [`crate::MemoryLeaseStore::disconnect`].
    #[error("lease store unavailable")]
    Unavailable,
}

impl StoreError for Error {}
