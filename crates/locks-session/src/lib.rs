//! Session-scoped distributed locks.
//!
//! Two families share the idea that the lock key lives only as long as a
//! store-side session:
//!
//! - [`SessionLocker`] for consul-like agents, where the session has a TTL
//!   that the lock holder renews.
//! - [`EphemeralLocker`] for zookeeper-like ensembles, where the lock is an
//!   ephemeral node and the session is kept alive by the client connection.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consul;
mod ensemble;
mod error;
mod memory;
mod zookeeper;

pub use consul::{HeldValue, SessionClient, SessionId, SessionLock, SessionLocker};
pub use ensemble::{MemoryEnsemble, MemoryZkClient};
pub use error::Error as MemorySessionError;
pub use memory::MemorySessionAgent;
pub use zookeeper::{EphemeralClient, EphemeralLock, EphemeralLocker, NodeLease, NodeStat};
