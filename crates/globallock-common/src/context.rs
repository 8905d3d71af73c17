//! Cancellable execution context
//!
//! A `LockContext` is a cheap, clonable cancellation handle. Children derived
//! from a context are cancelled together with it, and every cancellation
//! carries a [`CancelCause`]. The first cause recorded wins; later cancels are
//! no-ops.
//!
//! A lock holder receives a context derived from the one it passed in. That
//! context ends exactly when ownership ends, so code running under a lock can
//! check `is_done()` or await `cancelled()` instead of asking the store.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CancelCause;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    id: u64,
    /// Background contexts are never cancelled and do not track children
    background: bool,
    parent: Option<LockContext>,
    deadline: Option<Instant>,
    state: watch::Sender<Option<CancelCause>>,
    children: Mutex<Vec<Weak<ContextInner>>>,
}

/// Cancellable execution context
#[derive(Clone)]
pub struct LockContext {
    inner: Arc<ContextInner>,
}

impl LockContext {
    fn build(background: bool, parent: Option<LockContext>, deadline: Option<Instant>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                background,
                parent,
                deadline,
                state,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Root context that is never cancelled
    pub fn background() -> Self {
        Self::build(true, None, None)
    }

    /// Root context that can be cancelled explicitly
    pub fn new() -> Self {
        Self::build(false, None, None)
    }

    /// Derive a child that ends when this context ends or when cancelled itself
    pub fn child(&self) -> Self {
        self.derive(None)
    }

    /// Derive a child that additionally ends after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.derive(Some(Instant::now() + timeout))
    }

    /// Derive a child that additionally ends at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        // A child can never outlive its parent's deadline
        let deadline = match (deadline, self.deadline()) {
            (Some(own), Some(parent)) => Some(own.min(parent)),
            (own, parent) => own.or(parent),
        };

        let child = Self::build(false, Some(self.clone()), deadline);

        if !self.inner.background {
            let mut children = self.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }

        // Parent may have been cancelled before the child was registered
        if let Some(cause) = self.cause() {
            child.cancel(cause);
        } else if let Some(deadline) = deadline {
            child.spawn_deadline_timer(deadline);
        }

        child
    }

    fn spawn_deadline_timer(&self, deadline: Instant) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Without a runtime the deadline is still observed lazily by `cause()`
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let mut rx = self.inner.state.subscribe();
        handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(inner) = weak.upgrade() {
                        LockContext { inner }.cancel(CancelCause::DeadlineExceeded);
                    }
                }
                _ = rx.wait_for(|state| state.is_some()) => {}
            }
        });
    }

    /// Cancel this context and all of its descendants.
    ///
    /// Returns `true` if this call recorded the cause, `false` if the context
    /// was already done (or is a background context).
    pub fn cancel(&self, cause: CancelCause) -> bool {
        if self.inner.background {
            return false;
        }

        let recorded = cause.clone();
        let changed = self.inner.state.send_if_modified(move |state| {
            if state.is_none() {
                *state = Some(recorded);
                true
            } else {
                false
            }
        });

        if changed {
            let children = std::mem::take(&mut *self.inner.children.lock());
            for child in children {
                if let Some(inner) = child.upgrade() {
                    LockContext { inner }.cancel(cause.clone());
                }
            }
        }

        changed
    }

    /// The cause this context ended with, or `None` while it is live
    pub fn cause(&self) -> Option<CancelCause> {
        if let Some(cause) = self.inner.state.borrow().clone() {
            return Some(cause);
        }

        if let Some(deadline) = self.inner.deadline
            && Instant::now() >= deadline
        {
            self.cancel(CancelCause::DeadlineExceeded);
            return self.inner.state.borrow().clone();
        }

        if let Some(cause) = self.inner.parent.as_ref().and_then(|p| p.cause()) {
            self.cancel(cause);
            return self.inner.state.borrow().clone();
        }

        None
    }

    pub fn is_done(&self) -> bool {
        self.cause().is_some()
    }

    /// Wait until this context ends and return why
    pub async fn cancelled(&self) -> CancelCause {
        if let Some(cause) = self.cause() {
            return cause;
        }

        let mut rx = self.inner.state.subscribe();
        let deadline = self.inner.deadline;
        let cause = async {
            rx.wait_for(|state| state.is_some())
                .await
                .ok()
                .and_then(|state| state.clone())
        };

        let observed = match deadline {
            Some(deadline) => {
                tokio::select! {
                    cause = cause => cause,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.cancel(CancelCause::DeadlineExceeded);
                        None
                    }
                }
            }
            None => cause.await,
        };

        observed
            .or_else(|| self.cause())
            .unwrap_or(CancelCause::Canceled)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left until the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_background(&self) -> bool {
        self.inner.background
    }
}

/// The default context is [`LockContext::background`]: it can never be
/// cancelled. Use [`LockContext::new`] for a root that can be.
impl Default for LockContext {
    fn default() -> Self {
        Self::background()
    }
}

impl PartialEq for LockContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for LockContext {}

impl Debug for LockContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockContext")
            .field("id", &self.inner.id)
            .field("background", &self.inner.background)
            .field("cause", &*self.inner.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LeaseLossReason;

    #[test]
    fn test_background_is_never_done() {
        let ctx = LockContext::background();
        assert!(!ctx.is_done());
        assert!(!ctx.cancel(CancelCause::Canceled));
        assert!(!ctx.is_done());
    }

    #[test]
    fn test_child_is_distinct_from_parent() {
        let parent = LockContext::background();
        let child = parent.child();

        assert_ne!(parent, child);
        assert_eq!(child, child.clone());
    }

    #[test]
    fn test_first_cause_wins() {
        let ctx = LockContext::new();
        assert!(ctx.cancel(CancelCause::LeaseLost {
            key: "alpha".to_string(),
            reason: LeaseLossReason::Taken,
        }));
        assert!(!ctx.cancel(CancelCause::Released));

        assert!(ctx.cause().is_some_and(|c| c.is_lease_lost()));
    }

    #[test]
    fn test_cancel_propagates_to_descendants() {
        let root = LockContext::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel(CancelCause::Canceled);

        assert_eq!(child.cause(), Some(CancelCause::Canceled));
        assert_eq!(grandchild.cause(), Some(CancelCause::Canceled));
    }

    #[test]
    fn test_child_cancel_does_not_affect_parent() {
        let root = LockContext::new();
        let child = root.child();

        child.cancel(CancelCause::Released);

        assert!(child.is_done());
        assert!(!root.is_done());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_done() {
        let root = LockContext::new();
        root.cancel(CancelCause::Canceled);

        let child = root.child();
        assert_eq!(child.cause(), Some(CancelCause::Canceled));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let ctx = LockContext::new();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel(CancelCause::Released);

        let cause = waiter.await.unwrap();
        assert_eq!(cause, CancelCause::Released);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires() {
        let ctx = LockContext::background().with_timeout(Duration::from_secs(1));
        assert!(!ctx.is_done());
        assert!(ctx.remaining().is_some());

        let cause = ctx.cancelled().await;
        assert_eq!(cause, CancelCause::DeadlineExceeded);
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_inherits_parent_deadline() {
        let parent = LockContext::background().with_timeout(Duration::from_millis(500));
        let child = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());

        let cause = child.cancelled().await;
        assert_eq!(cause, CancelCause::DeadlineExceeded);
    }

    #[test]
    fn test_deadline_observed_without_runtime() {
        let ctx = LockContext::background().with_timeout(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(ctx.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[test]
    fn test_default_is_background_not_new() {
        let default = LockContext::default();
        assert!(default.is_background());
        assert!(!default.cancel(CancelCause::Canceled));
        assert!(!default.is_done());

        let root = LockContext::new();
        assert!(!root.is_background());
        assert!(root.cancel(CancelCause::Canceled));
    }
}
