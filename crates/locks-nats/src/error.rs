use std::time::Duration;

use async_nats::jetstream::context::CreateKeyValueError;
use async_nats::jetstream::kv::{CreateError, DeleteError, EntryError, UpdateError};
use distlock::StoreError;
use thiserror::Error;

/// Errors that can occur when talking to the NATS KV bucket.
#[derive(Error, Debug)]
pub enum Error {
    /// Error creating or binding the KV bucket.
    #[error("NATS JetStream context error creating KV store: {0}")]
    CreateKv(#[from] CreateKeyValueError),

    /// Error creating a key.
    #[error("NATS KV create error: {0}")]
    Create(#[from] CreateError),

    /// Error reading a key.
    #[error("NATS KV entry error: {0}")]
    Entry(#[from] EntryError),

    /// Error updating a key.
    #[error("NATS KV update error: {0}")]
    Update(#[from] UpdateError),

    /// Error deleting a key.
    #[error("NATS KV delete error: {0}")]
    Delete(DeleteError),

    /// An operation kept timing out.
    #[error("NATS operation timed out after {attempts} attempts of {after:?}")]
    Timeout {
        /// Number of attempts made.
        attempts: usize,

        /// Per-attempt timeout.
        after: Duration,
    },

    /// Maximum retry attempts exceeded.
    #[error("maximum retry attempts ({max_attempts}) exceeded for NATS operation: {last_error}")]
    MaxRetriesExceeded {
        /// Maximum number of attempts that were allowed.
        max_attempts: usize,

        /// The last error message received.
        last_error: String,
    },
}

impl StoreError for Error {}

/// Whether a failed NATS call is worth repeating.
pub fn is_retriable(error: &str) -> bool {
    error.contains("timeout")
        || error.contains("connection")
        || error.contains("unavailable")
        || error.contains("temporary")
        || error.contains("stream not found") // Can happen during cluster failover
}
