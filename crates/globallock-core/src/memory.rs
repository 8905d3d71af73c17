// In-process locker
// One async mutex per key; exclusion holds only within this process

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use globallock_common::{LockContext, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::handle::{LockHandle, Release};
use crate::locker::{Locker, cancelled};
use crate::metrics::{self, Timer};

const BACKEND: &str = "memory";

/// Per-key exclusive locks for single-node deployments.
///
/// Waiters on one key are served in FIFO order (tokio's mutex queue).
/// Entries are created on first use and kept for the life of the locker.
pub struct MemoryLocker {
    pub(crate) locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for MemoryLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn mutex_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    fn handle(&self, ctx: &LockContext, key: &str, guard: OwnedMutexGuard<()>) -> LockHandle {
        debug!(key = %key, "Lock acquired");
        LockHandle::new(
            key,
            BACKEND,
            ctx,
            ctx.child(),
            Box::new(MemoryRelease { _guard: guard }),
        )
    }
}

struct MemoryRelease {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl Release for MemoryRelease {
    async fn release(self: Box<Self>) {
        // Guard drops here and unlocks the key
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn lock(&self, ctx: &LockContext, key: &str) -> Result<LockHandle> {
        if let Some(cause) = ctx.cause() {
            metrics::record_acquire(BACKEND, "cancelled");
            return Err(cancelled(key, cause));
        }

        let timer = Timer::new();
        let mutex = self.mutex_for(key);

        let guard = tokio::select! {
            biased;
            guard = mutex.lock_owned() => guard,
            cause = ctx.cancelled() => {
                metrics::record_acquire(BACKEND, "cancelled");
                debug!(
                    key = %key,
                    waited_ms = timer.elapsed_ms(),
                    cause = %cause,
                    "Lock wait cancelled"
                );
                return Err(cancelled(key, cause));
            }
        };

        // Both branches may have been ready; a context that ended must not get a hold
        if let Some(cause) = ctx.cause() {
            drop(guard);
            metrics::record_acquire(BACKEND, "cancelled");
            return Err(cancelled(key, cause));
        }

        metrics::record_acquired(BACKEND, &timer);
        Ok(self.handle(ctx, key, guard))
    }

    async fn try_lock(&self, ctx: &LockContext, key: &str) -> Result<Option<LockHandle>> {
        if let Some(cause) = ctx.cause() {
            metrics::record_acquire(BACKEND, "cancelled");
            return Err(cancelled(key, cause));
        }

        match self.mutex_for(key).try_lock_owned() {
            Ok(guard) => {
                if let Some(cause) = ctx.cause() {
                    drop(guard);
                    metrics::record_acquire(BACKEND, "cancelled");
                    return Err(cancelled(key, cause));
                }
                metrics::record_acquired(BACKEND, &Timer::new());
                Ok(Some(self.handle(ctx, key, guard)))
            }
            Err(_) => {
                metrics::record_acquire(BACKEND, "busy");
                Ok(None)
            }
        }
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
