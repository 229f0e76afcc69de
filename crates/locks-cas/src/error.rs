use distlock::StoreError;
use thiserror::Error;

/// Errors returned by the in-memory key-value stores.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The store was disconnected.
    #[error("cache server unavailable")]
    Unavailable,
}

impl StoreError for Error {}
