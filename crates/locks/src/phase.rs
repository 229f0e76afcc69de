use std::fmt;

/// Lifecycle of a locker instance, as seen by its owner.
///
/// `Acquiring` and `Renewing` are transient and only observable through
/// [`crate::DistributedLock::watch_phase`]. Backend-side expiry is not a
/// phase: a holder that lost its record stays `Held` until it calls
/// `renew` or `unlock` and is told otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LockPhase {
    /// Never acquired.
    #[default]
    Idle,

    /// An acquisition attempt is in flight.
    Acquiring,

    /// The backend accepted this owner and the renewal task is running.
    Held,

    /// A renewal call is in flight.
    Renewing,

    /// Released by `unlock`. The instance may lock again.
    Released,
}

impl LockPhase {
    /// Whether this instance believes it owns the lock.
    #[must_use]
    pub const fn is_held(self) -> bool {
        matches!(self, Self::Held | Self::Renewing)
    }
}

impl fmt::Display for LockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Held => "held",
            Self::Renewing => "renewing",
            Self::Released => "released",
        };
        f.write_str(phase)
    }
}

/// Notifications published by a locker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockEvent {
    /// The lock was acquired.
    Acquired,

    /// A renewal succeeded.
    Renewed,

    /// A scheduled renewal failed. The locker still reports `Held`.
    RenewalFailed {
        /// Display form of the failure.
        reason: String,

        /// The backend reported the record missing or owned by someone else.
        lost: bool,
    },

    /// The lock was released by `unlock`.
    Released,
}

/// Current status of a lock in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is free.
    Free,

    /// The lock is held by another instance, identified by the String.
    HeldByOther(String),

    /// The lock is held by the current owner.
    HeldBySelf,
}
