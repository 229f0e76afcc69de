use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Marker trait for errors produced by store clients.
///
/// Every backend adapter is generic over a store client whose error type
/// implements this trait, so failures can be carried as [`Error::Backend`].
pub trait StoreError: StdError + Send + Sync + 'static {}

/// Owner reported in a conflict when the backend does not reveal the holder.
pub const UNKNOWN_OWNER: &str = "<unknown>";

/// Result alias used throughout the lock crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by lockers.
#[derive(Debug, Error)]
pub enum Error {
    /// A live record for the lock is owned by someone else.
    #[error("lock `{name}` is already held by `{owner}`")]
    Conflict {
        /// The contended lock name.
        name: String,
        /// The owner currently holding the lock.
        owner: String,
    },

    /// The lock record does not exist or belongs to another owner.
    #[error("lock `{name}` is not held by `{owner}`")]
    NotHeld {
        /// The lock name.
        name: String,
        /// The owner that expected to hold the lock.
        owner: String,
    },

    /// The store client call failed.
    #[error("backend operation `{operation}` failed: {source}")]
    Backend {
        /// The store primitive that failed.
        operation: &'static str,
        /// The store client's error.
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    /// The store client call did not complete in time.
    #[error("backend operation `{operation}` timed out after {after:?}")]
    Timeout {
        /// The store primitive that timed out.
        operation: &'static str,
        /// The configured operation timeout.
        after: Duration,
    },

    /// Invalid construction parameters.
    #[error("invalid lock configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// Wraps a store client error.
    pub fn backend<E: StoreError>(operation: &'static str, source: E) -> Self {
        Self::Backend {
            operation,
            source: Box::new(source),
        }
    }

    /// A conflict on `name` with the current holder `owner`.
    pub fn conflict(name: &str, owner: impl Into<String>) -> Self {
        Self::Conflict {
            name: name.to_string(),
            owner: owner.into(),
        }
    }

    /// `owner` no longer holds `name`.
    #[must_use]
    pub fn not_held(name: &str, owner: &str) -> Self {
        Self::NotHeld {
            name: name.to_string(),
            owner: owner.to_string(),
        }
    }

    /// Whether another owner holds the lock.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the lock was found missing or reassigned.
    #[must_use]
    pub const fn is_not_held(&self) -> bool {
        matches!(self, Self::NotHeld { .. })
    }

    /// Whether the failure came from talking to the backend.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. })
    }

    /// Whether trying the same operation again later may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.is_conflict() || self.is_transport()
    }
}
