//! Lock handle returned by a successful acquisition

use async_trait::async_trait;
use globallock_common::{CancelCause, LockContext};
use tokio::sync::Mutex;
use tracing::debug;

use crate::metrics::{self, Timer};

/// Backend-specific work needed to give a key back
#[async_trait]
pub(crate) trait Release: Send {
    async fn release(self: Box<Self>);
}

/// Ownership of one key.
///
/// `context()` stays live exactly as long as the lock is held. It is
/// cancelled with [`CancelCause::Released`] on release, or with
/// [`CancelCause::LeaseLost`] when a leased backend loses the lease.
///
/// Dropping the handle releases the lock as well.
pub struct LockHandle {
    key: String,
    backend: &'static str,
    parent: LockContext,
    context: LockContext,
    held: Timer,
    release: Mutex<Option<Box<dyn Release>>>,
}

impl LockHandle {
    pub(crate) fn new(
        key: &str,
        backend: &'static str,
        parent: &LockContext,
        context: LockContext,
        release: Box<dyn Release>,
    ) -> Self {
        Self {
            key: key.to_string(),
            backend,
            parent: parent.clone(),
            context,
            held: Timer::new(),
            release: Mutex::new(Some(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Context derived at acquisition; done once ownership ends
    pub fn context(&self) -> &LockContext {
        &self.context
    }

    /// Context the caller passed to `lock`/`try_lock`
    pub fn parent(&self) -> &LockContext {
        &self.parent
    }

    /// Whether ownership is still believed to be held
    pub fn is_held(&self) -> bool {
        !self.context.is_done()
    }

    /// Give the key back and return the parent context.
    ///
    /// Safe to call any number of times; only the first call has an effect
    /// and concurrent callers wait for it to finish.
    pub async fn release(&self) -> LockContext {
        let mut slot = self.release.lock().await;
        if let Some(release) = slot.take() {
            // Cancel first so no two live contexts ever exist for one key
            self.context.cancel(CancelCause::Released);
            release.release().await;
            metrics::record_release(self.backend);
            debug!(
                key = %self.key,
                backend = self.backend,
                held_ms = self.held.elapsed_ms(),
                "Lock released"
            );
        }
        self.parent.clone()
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("backend", &self.backend)
            .field("context", &self.context)
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take() {
            self.context.cancel(CancelCause::Released);
            // Dropping the releaser frees the key; leased backends finish in the background
            drop(release);
            metrics::record_release(self.backend);
            debug!(key = %self.key, backend = self.backend, "Lock released on drop");
        }
    }
}
