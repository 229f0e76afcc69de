use distlock::StoreError;
use thiserror::Error;

/// Errors returned by the record stores in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The in-memory store was disconnected.
    #[error("record store unavailable")]
    Unavailable,

    /// A stored timestamp is out of range.
    #[error("invalid timestamp {value} in column {column}")]
    InvalidTimestamp {
        /// The column holding the value.
        column: &'static str,

        /// The raw unix milliseconds.
        value: i64,
    },

    /// The database returned an error.
    #[error(transparent)]
    Libsql(#[from] libsql::Error),
}

impl StoreError for Error {}
