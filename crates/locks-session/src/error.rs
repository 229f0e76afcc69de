use distlock::StoreError;
use thiserror::Error;

/// Errors returned by the in-memory session stores.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The agent was disconnected with [`crate::MemorySessionAgent::disconnect`].
    #[error("session agent unavailable")]
    AgentUnavailable,

    /// The client lost its connection to the ensemble.
    #[error("connection to ensemble lost")]
    ConnectionLoss,

    /// The client's session was closed; its ephemeral nodes are gone.
    #[error("session {0} closed")]
    SessionClosed(i64),
}

impl StoreError for Error {}
