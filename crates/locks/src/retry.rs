use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::Locker;
use crate::error::Result;

/// Backoff settings for [`lock_with_retry`].
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,

    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,

    /// Growth factor applied after each failed attempt, before jitter.
    pub multiplier: f64,

    /// Give up once this much time has passed. Waits forever if not set.
    pub max_wait: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 1.5,
            max_wait: None,
        }
    }
}

impl RetryPolicy {
    /// The delay after `delay`: grown by `multiplier` plus jitter, capped at
    /// `max_delay`. A factor that leaves the range of `Duration` (negative,
    /// NaN or too large) yields `max_delay`.
    fn next_delay(&self, delay: Duration) -> Duration {
        let factor = fastrand::f64().mul_add(0.1, self.multiplier);

        Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }
}

/// Calls `lock` until it succeeds, sleeping between attempts.
///
/// Conflicts and transport failures are retried with exponential backoff
/// plus up to 10% jitter. Any other error is returned immediately.
///
/// # Errors
///
/// Returns the last error once `max_wait` has elapsed, or the first
/// non-retriable error.
#[instrument(skip_all, fields(lock = %locker.name(), owner = %locker.owner_id()))]
pub async fn lock_with_retry<L>(locker: &L, policy: &RetryPolicy) -> Result<()>
where
    L: Locker + ?Sized,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        match locker.lock().await {
            Ok(()) => {
                if attempts > 1 {
                    info!(attempts, "lock acquired after waiting");
                }
                return Ok(());
            }
            Err(err) if err.is_retriable() => {
                if policy
                    .max_wait
                    .is_some_and(|max_wait| started.elapsed().saturating_add(delay) > max_wait)
                {
                    debug!(attempts, error = %err, "giving up on lock");
                    return Err(err);
                }

                debug!(attempts, error = %err, ?delay, "lock unavailable, retrying");
                tokio::time::sleep(delay).await;

                delay = policy.next_delay(delay);
            }
            Err(err) => return Err(err),
        }
    }
}
