use distlock::StoreError;
use redis::RedisError;
use thiserror::Error;

/// Errors returned by the redis client.
#[derive(Error, Debug)]
pub enum Error {
    /// Connecting to, or talking to, the server failed.
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
}

impl StoreError for Error {}
