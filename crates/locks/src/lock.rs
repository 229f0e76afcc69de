use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, debug, error, info, instrument, warn};

use crate::Locker;
use crate::backend::{LockBackend, LockSpec};
use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::phase::{LockEvent, LockPhase, LockStatus};

const EVENT_CAPACITY: usize = 32;

/// A named lock bound to one backend and one owner.
///
/// Implements [`Locker`] for any [`LockBackend`]. All operations, including
/// the background renewals, run one at a time. A successful `lock` spawns a
/// renewal task ticking every `renew_interval`; `unlock` stops it before the
/// backend record is touched. Dropping the lock stops the renewal task and
/// leaves the record to expire.
pub struct DistributedLock<B: LockBackend> {
    inner: Arc<Inner<B>>,
    _shutdown: DropGuard,
}

struct Inner<B: LockBackend> {
    backend: B,
    spec: LockSpec,
    renew_interval: Duration,
    operation_timeout: Duration,
    dispatch: Option<Dispatch>,
    shutdown: CancellationToken,
    state: Mutex<State<B::Lease>>,
    phase: watch::Sender<LockPhase>,
    events: broadcast::Sender<LockEvent>,
}

struct State<L> {
    lease: Option<L>,
    renewal: Option<Renewal>,
    /// Set when a scheduled renewal found the record gone or reassigned.
    lost: bool,
}

impl<L> State<L> {
    /// Drops the local claim on the lock without touching the backend.
    fn forget(&mut self) -> Option<L> {
        if let Some(renewal) = self.renewal.take() {
            renewal.stop();
        }
        self.lost = false;
        self.lease.take()
    }
}

/// Handle on a running renewal task.
struct Renewal {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Renewal {
    fn stop(self) {
        self.token.cancel();
        self.task.abort();
    }
}

impl<B: LockBackend> DistributedLock<B> {
    /// Binds a backend to a lock configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the configuration is invalid.
    pub fn new(backend: B, config: LockConfig) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let (phase, _) = watch::channel(LockPhase::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Inner {
            backend,
            spec: LockSpec::from(&config),
            renew_interval: config.renew_interval(),
            operation_timeout: config.operation_timeout(),
            dispatch: config.dispatch,
            shutdown: shutdown.clone(),
            state: Mutex::new(State {
                lease: None,
                renewal: None,
                lost: false,
            }),
            phase,
            events,
        };

        Ok(Self {
            inner: Arc::new(inner),
            _shutdown: shutdown.drop_guard(),
        })
    }

    /// The backend this lock talks to.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// The lock identity.
    pub fn spec(&self) -> &LockSpec {
        &self.inner.spec
    }

    /// The current phase.
    pub fn phase(&self) -> LockPhase {
        *self.inner.phase.borrow()
    }

    /// Watches phase transitions.
    pub fn watch_phase(&self) -> watch::Receiver<LockPhase> {
        self.inner.phase.subscribe()
    }

    /// Subscribes to lock events, including scheduled renewal failures.
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.inner.events.subscribe()
    }
}

impl<B: LockBackend> std::fmt::Debug for DistributedLock<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("name", &self.inner.spec.name)
            .field("owner_id", &self.inner.spec.owner_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: LockBackend> Locker for DistributedLock<B> {
    fn name(&self) -> &str {
        &self.inner.spec.name
    }

    fn owner_id(&self) -> &str {
        &self.inner.spec.owner_id
    }

    async fn lock(&self) -> Result<()> {
        self.inner.scoped(self.inner.lock()).await
    }

    async fn unlock(&self) -> Result<()> {
        self.inner.scoped(self.inner.unlock()).await
    }

    async fn renew(&self) -> Result<()> {
        self.inner.scoped(self.inner.renew()).await
    }

    async fn status(&self) -> Result<LockStatus> {
        self.inner.scoped(self.inner.status()).await
    }
}

impl<B: LockBackend> Inner<B> {
    #[instrument(skip_all, fields(lock = %self.spec.name, owner = %self.spec.owner_id))]
    async fn lock(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.lease.is_some() {
            if !state.lost {
                debug!("lock already held by this instance");
                return Ok(());
            }

            state.forget();
            self.phase.send_replace(LockPhase::Released);
            debug!("lock was lost, acquiring again");
        }

        let previous = self.phase.send_replace(LockPhase::Acquiring);

        match self
            .bounded("acquire", self.backend.acquire(&self.spec))
            .await
        {
            Ok(lease) => {
                state.lease = Some(lease);
                state.renewal = Some(self.start_renewal());
                self.phase.send_replace(LockPhase::Held);
                self.emit(LockEvent::Acquired);
                info!(
                    timeout = ?self.spec.timeout,
                    renew_interval = ?self.renew_interval,
                    "lock acquired"
                );
                Ok(())
            }
            Err(err) => {
                self.phase.send_replace(previous);
                if err.is_conflict() {
                    warn!(error = %err, "lock is already held by another owner");
                } else {
                    error!(error = %err, "failed to acquire lock");
                }
                Err(err)
            }
        }
    }

    #[instrument(skip_all, fields(lock = %self.spec.name, owner = %self.spec.owner_id))]
    async fn unlock(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;

        // No renewal may reach the backend once release has begun.
        let lost = state.lost;
        let Some(lease) = state.forget() else {
            debug!("lock not held, nothing to release");
            return Ok(());
        };
        debug!("stopped renewing lock");

        let result = self
            .bounded("release", self.backend.release(&self.spec, lease.clone()))
            .await;

        match &result {
            Err(err) if err.is_transport() => {
                // The record may still be ours; keep holding it so unlock can be retried.
                state.lease = Some(lease);
                state.lost = lost;
                state.renewal = Some(self.start_renewal());
                error!(error = %err, "failed to release lock, still held");
                return result;
            }
            Ok(()) => info!("lock released"),
            Err(err) => warn!(error = %err, "released locally, backend record was not ours"),
        }

        self.phase.send_replace(LockPhase::Released);
        self.emit(LockEvent::Released);

        result
    }

    #[instrument(skip_all, fields(lock = %self.spec.name, owner = %self.spec.owner_id))]
    async fn renew(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let result = self.renew_locked(&mut state).await;

        match &result {
            Ok(()) => debug!("lock renewed"),
            Err(err) if err.is_not_held() && state.lease.is_some() => {
                state.forget();
                self.phase.send_replace(LockPhase::Released);
                warn!(error = %err, "lock lost, released locally");
            }
            Err(err) => warn!(error = %err, "failed to renew lock"),
        }

        result
    }

    #[instrument(skip_all, fields(lock = %self.spec.name))]
    async fn status(&self) -> Result<LockStatus> {
        let owner = self
            .bounded("inspect", self.backend.inspect(&self.spec))
            .await?;

        Ok(match owner {
            None => LockStatus::Free,
            Some(owner) if owner == self.spec.owner_id => LockStatus::HeldBySelf,
            Some(owner) => LockStatus::HeldByOther(owner),
        })
    }

    async fn renew_locked(&self, state: &mut State<B::Lease>) -> Result<()> {
        let Some(lease) = state.lease.as_mut() else {
            return Err(Error::not_held(&self.spec.name, &self.spec.owner_id));
        };

        self.phase.send_replace(LockPhase::Renewing);
        let result = self
            .bounded("renew", self.backend.renew(&self.spec, lease))
            .await;
        self.phase.send_replace(LockPhase::Held);

        if result.is_ok() {
            self.emit(LockEvent::Renewed);
        }

        result
    }

    fn start_renewal(self: &Arc<Self>) -> Renewal {
        let token = self.shutdown.child_token();
        let task = tokio::spawn(
            Arc::clone(self)
                .renew_periodically(token.clone())
                .with_current_subscriber(),
        );

        Renewal { token, task }
    }

    #[instrument(
        name = "renewal",
        skip_all,
        fields(lock = %self.spec.name, owner = %self.spec.owner_id)
    )]
    async fn renew_periodically(self: Arc<Self>, token: CancellationToken) {
        let period = self.renew_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut state = self.state.lock().await;
            if token.is_cancelled() {
                break;
            }

            match self.renew_locked(&mut state).await {
                Ok(()) => debug!("lock renewed"),
                Err(err) => {
                    let lost = err.is_not_held();
                    if lost {
                        state.lost = true;
                        warn!(error = %err, "lock may have been lost");
                    } else {
                        error!(error = %err, "failed to renew lock");
                    }
                    self.emit(LockEvent::RenewalFailed {
                        reason: err.to_string(),
                        lost,
                    });
                }
            }
        }

        debug!("renewal task stopped");
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.operation_timeout, call)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                after: self.operation_timeout,
            })?
    }

    async fn scoped<F: Future>(&self, call: F) -> F::Output {
        match &self.dispatch {
            Some(dispatch) => call.with_subscriber(dispatch.clone()).await,
            None => call.await,
        }
    }

    fn emit(&self, event: LockEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
