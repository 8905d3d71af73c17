//! Leased remote locker
//!
//! Acquires a key-scoped lease in a shared [`LeaseStore`] and keeps it alive
//! with a renewal task owned by the lock handle:
//! - the task extends the lease every `expiry / 3`
//! - a failed or late extension cancels the handle's context with
//!   [`CancelCause::LeaseLost`] and stops the task
//! - release signals the task, which deletes the lease if still owned and
//!   exits; release returns only after the task has finished

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use globallock_common::{
    CancelCause, GlobalLockError, LeaseLossReason, LockContext, Result, StoreError,
};
use globallock_store::{AcquireOutcome, LeaseStore, LeaseToken, ReleaseOutcome};
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::handle::{LockHandle, Release};
use crate::locker::{Locker, cancelled};
use crate::metrics::{self, Timer};

/// Default lease expiry (30 seconds).
pub const DEFAULT_LEASE_EXPIRY: Duration = Duration::from_secs(30);

/// Bounds of the jittered delay between acquisition attempts on a busy key.
const RETRY_DELAY_MIN: Duration = Duration::from_millis(50);
const RETRY_DELAY_MAX: Duration = Duration::from_millis(250);

/// Locker whose exclusion holds across every process sharing the store
pub struct LeasedLocker {
    store: Arc<dyn LeaseStore>,
    expiry: Duration,
    /// Key -> token of the lease this process currently holds
    leases: Arc<DashMap<String, LeaseToken>>,
}

impl LeasedLocker {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self::with_expiry(store, DEFAULT_LEASE_EXPIRY)
    }

    pub fn with_expiry(store: Arc<dyn LeaseStore>, expiry: Duration) -> Self {
        Self {
            store,
            expiry,
            leases: Arc::new(DashMap::new()),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Interval between lease extensions
    pub fn renewal_interval(&self) -> Duration {
        (self.expiry / 3).max(Duration::from_millis(1))
    }

    /// Token of the lease this process holds on `key`, if any
    pub fn active_lease(&self, key: &str) -> Option<LeaseToken> {
        self.leases.get(key).map(|t| t.clone())
    }

    fn retry_delay() -> Duration {
        let min = RETRY_DELAY_MIN.as_millis() as u64;
        let max = RETRY_DELAY_MAX.as_millis() as u64;
        let millis = rand::rng().random_range(min..=max);
        Duration::from_millis(millis)
    }

    fn start_hold(&self, ctx: &LockContext, key: &str, token: LeaseToken) -> LockHandle {
        let context = ctx.child();
        let (stop_tx, stop_rx) = oneshot::channel();

        self.leases.insert(key.to_string(), token.clone());

        let renewal = RenewalTask {
            store: self.store.clone(),
            leases: self.leases.clone(),
            key: key.to_string(),
            token,
            expiry: self.expiry,
            interval: self.renewal_interval(),
            context: context.clone(),
        };
        let join = tokio::spawn(renewal.run(stop_rx));

        debug!(
            key = %key,
            store = self.store.name(),
            expiry_ms = self.expiry.as_millis() as u64,
            "Lease acquired"
        );

        LockHandle::new(
            key,
            self.store.name(),
            ctx,
            context,
            Box::new(LeasedRelease {
                stop: stop_tx,
                join,
            }),
        )
    }
}

#[async_trait]
impl Locker for LeasedLocker {
    async fn lock(&self, ctx: &LockContext, key: &str) -> Result<LockHandle> {
        let backend = self.store.name();
        let timer = Timer::new();

        loop {
            if let Some(cause) = ctx.cause() {
                metrics::record_acquire(backend, "cancelled");
                return Err(cancelled(key, cause));
            }

            match self.attempt(ctx, key).await {
                Ok(AcquireOutcome::Acquired(token)) => {
                    metrics::record_acquired(backend, &timer);
                    return Ok(self.start_hold(ctx, key, token));
                }
                Ok(AcquireOutcome::Busy) => {}
                Err(e) => {
                    record_failure(backend, &e);
                    if !e.is_cancelled() {
                        warn!(key = %key, error = %e, "Lease acquisition failed");
                    }
                    return Err(e);
                }
            }

            tokio::select! {
                cause = ctx.cancelled() => {
                    metrics::record_acquire(backend, "cancelled");
                    debug!(
                        key = %key,
                        waited_ms = timer.elapsed_ms(),
                        cause = %cause,
                        "Lease wait cancelled"
                    );
                    return Err(cancelled(key, cause));
                }
                _ = tokio::time::sleep(Self::retry_delay()) => {}
            }
        }
    }

    async fn try_lock(&self, ctx: &LockContext, key: &str) -> Result<Option<LockHandle>> {
        let backend = self.store.name();
        if let Some(cause) = ctx.cause() {
            metrics::record_acquire(backend, "cancelled");
            return Err(cancelled(key, cause));
        }

        match self.attempt(ctx, key).await {
            Ok(AcquireOutcome::Acquired(token)) => {
                metrics::record_acquired(backend, &Timer::new());
                Ok(Some(self.start_hold(ctx, key, token)))
            }
            Ok(AcquireOutcome::Busy) => {
                metrics::record_acquire(backend, "busy");
                Ok(None)
            }
            Err(e) => {
                record_failure(backend, &e);
                Err(e)
            }
        }
    }

    fn backend(&self) -> &'static str {
        self.store.name()
    }
}

impl LeasedLocker {
    /// One store acquisition, abandoned as soon as `ctx` ends.
    ///
    /// The request runs on its own task so an abandoned call can still
    /// finish; a lease it grants after the caller left is deleted.
    async fn attempt(&self, ctx: &LockContext, key: &str) -> Result<AcquireOutcome> {
        let store = self.store.clone();
        let owned_key = key.to_string();
        let expiry = self.expiry;
        let mut request = tokio::spawn(async move { store.acquire(&owned_key, expiry).await });

        tokio::select! {
            biased;
            joined = &mut request => {
                let outcome = joined.map_err(|e| GlobalLockError::Other(e.into()))??;
                if let AcquireOutcome::Acquired(token) = &outcome
                    && let Some(cause) = ctx.cause()
                {
                    // The caller gave up while the store answered
                    discard_lease(self.store.clone(), key.to_string(), token.clone(), expiry)
                        .await;
                    return Err(cancelled(key, cause));
                }
                Ok(outcome)
            }
            cause = ctx.cancelled() => {
                let store = self.store.clone();
                let owned_key = key.to_string();
                tokio::spawn(async move {
                    if let Ok(Ok(AcquireOutcome::Acquired(token))) = request.await {
                        discard_lease(store, owned_key, token, expiry).await;
                    }
                });
                Err(cancelled(key, cause))
            }
        }
    }
}

fn record_failure(backend: &'static str, err: &GlobalLockError) {
    let outcome = if err.is_cancelled() {
        "cancelled"
    } else {
        err.kind()
    };
    metrics::record_acquire(backend, outcome);
}

/// Delete a lease nobody will hold; bounded so a stuck store cannot pin the caller
async fn discard_lease(
    store: Arc<dyn LeaseStore>,
    key: String,
    token: LeaseToken,
    expiry: Duration,
) {
    match tokio::time::timeout(expiry / 3, store.release(&key, &token)).await {
        Ok(Ok(_)) => debug!(key = %key, "Discarded lease granted after cancellation"),
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Failed to discard unused lease, it will expire")
        }
        Err(_) => warn!(key = %key, "Timed out discarding unused lease, it will expire"),
    }
}

/// Dropping this without calling `release` closes the stop channel, which the
/// renewal task treats like a release
struct LeasedRelease {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

#[async_trait]
impl Release for LeasedRelease {
    async fn release(self: Box<Self>) {
        let LeasedRelease { stop, join } = *self;
        // Err means the task already ended after losing the lease
        let _ = stop.send(());
        if let Err(e) = join.await {
            warn!(error = %e, "Lease renewal task ended abnormally");
        }
    }
}

/// Background task owned by one lock hold
struct RenewalTask {
    store: Arc<dyn LeaseStore>,
    leases: Arc<DashMap<String, LeaseToken>>,
    key: String,
    token: LeaseToken,
    expiry: Duration,
    interval: Duration,
    context: LockContext,
}

impl RenewalTask {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                // Fires on release and when the handle is dropped
                _ = &mut stop_rx => {
                    self.delete_lease().await;
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(reason) = self.extend_once().await {
                        metrics::record_lease_lost(reason.kind());
                        warn!(key = %self.key, reason = %reason, "Lease lost, cancelling lock context");
                        self.context.cancel(CancelCause::LeaseLost {
                            key: self.key.clone(),
                            reason,
                        });
                        break;
                    }
                }
            }
        }

        self.leases.remove_if(&self.key, |_, token| token == &self.token);
    }

    async fn extend_once(&self) -> std::result::Result<(), LeaseLossReason> {
        // A renewal slower than one interval could outlive the lease
        match tokio::time::timeout(
            self.interval,
            self.store.extend(&self.key, &self.token, self.expiry),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!(key = %self.key, "Lease extended");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(StoreError::Timeout.into()),
        }
    }

    async fn delete_lease(&self) {
        self.context.cancel(CancelCause::Released);
        match tokio::time::timeout(self.interval, self.store.release(&self.key, &self.token)).await
        {
            Ok(Ok(ReleaseOutcome::Released)) => debug!(key = %self.key, "Lease deleted"),
            Ok(Ok(ReleaseOutcome::AlreadyLost)) => {
                debug!(key = %self.key, "Lease already gone at release")
            }
            Ok(Err(e)) => {
                warn!(key = %self.key, error = %e, "Failed to delete lease, it will expire")
            }
            Err(_) => warn!(key = %self.key, "Timed out deleting lease, it will expire"),
        }
    }
}
