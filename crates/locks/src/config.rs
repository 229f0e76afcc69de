use std::sync::Arc;
use std::time::Duration;

use tracing::Dispatch;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// Lock name used when none is configured.
pub const DEFAULT_LOCK_NAME: &str = "distributed-lock";

/// Lease duration used when none is configured.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a single backend call used when none is configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

const UNKNOWN_HOST: &str = "unknown-host";

/// Configuration for a single named lock held by one owner.
#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Logical resource identifier, unique within a backend namespace.
    pub name: String,

    /// Identifier of the acquiring instance. Defaults to the host name.
    pub owner_id: String,

    /// Lease duration. The record expires unless renewed within this window.
    pub timeout: Duration,

    /// Renewal cadence. Defaults to half of `timeout` if not set.
    pub renew_interval: Option<Duration>,

    /// Bound on each individual backend call. Defaults to 10 seconds if not set.
    pub operation_timeout: Option<Duration>,

    /// Wall-clock provider used to compute record expiry.
    pub clock: Arc<dyn Clock>,

    /// Diagnostics sink. Uses the ambient `tracing` subscriber if not set.
    pub dispatch: Option<Dispatch>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOCK_NAME.to_string(),
            owner_id: default_owner_id(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            renew_interval: None,
            operation_timeout: None,
            clock: Arc::new(SystemClock),
            dispatch: None,
        }
    }
}

impl LockConfig {
    /// Creates a configuration for the given lock name with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the owner identifier.
    #[must_use]
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Sets the lease duration.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the renewal cadence.
    #[must_use]
    pub const fn with_renew_interval(mut self, renew_interval: Duration) -> Self {
        self.renew_interval = Some(renew_interval);
        self
    }

    /// Sets the bound on individual backend calls.
    #[must_use]
    pub const fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = Some(operation_timeout);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Routes this lock's diagnostics to the given subscriber.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// The effective renewal cadence.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        self.renew_interval.unwrap_or(self.timeout / 2)
    }

    /// The effective bound on individual backend calls.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT)
    }

    /// Checks the configuration for values no backend can honour.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("lock name must not be empty".into()));
        }

        if self.owner_id.trim().is_empty() {
            return Err(Error::Configuration("owner id must not be empty".into()));
        }

        if self.timeout.is_zero() {
            return Err(Error::Configuration("lock timeout must be non-zero".into()));
        }

        let renew_interval = self.renew_interval();
        if renew_interval.is_zero() || renew_interval >= self.timeout {
            return Err(Error::Configuration(format!(
                "renew interval {renew_interval:?} must be non-zero and below the timeout {:?}",
                self.timeout
            )));
        }

        if self.operation_timeout().is_zero() {
            return Err(Error::Configuration(
                "operation timeout must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

/// The host name of this machine, used as the default owner identifier.
#[must_use]
pub fn default_owner_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = LockConfig::default();

        assert_eq!(config.name, DEFAULT_LOCK_NAME);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.renew_interval(), Duration::from_secs(5));
        assert_eq!(config.operation_timeout(), DEFAULT_OPERATION_TIMEOUT);
        assert!(!config.owner_id.is_empty());
        assert!(config.dispatch.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = LockConfig::new("jobs")
            .with_owner_id("node-a")
            .with_timeout(Duration::from_secs(2))
            .with_operation_timeout(Duration::from_millis(500));

        assert_eq!(config.name, "jobs");
        assert_eq!(config.owner_id, "node-a");
        assert_eq!(config.renew_interval(), Duration::from_secs(1));
        assert_eq!(config.operation_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert_matches!(
            LockConfig::new("").validate(),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            LockConfig::new("jobs").with_owner_id(" ").validate(),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            LockConfig::new("jobs")
                .with_timeout(Duration::ZERO)
                .validate(),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            LockConfig::new("jobs")
                .with_timeout(Duration::from_secs(2))
                .with_renew_interval(Duration::from_secs(2))
                .validate(),
            Err(Error::Configuration(_))
        );
    }
}
