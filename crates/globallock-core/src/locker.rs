//! Locker capability shared by every backend

use async_trait::async_trait;
use globallock_common::{CancelCause, GlobalLockError, LockContext, Result};

use crate::handle::LockHandle;

/// Per-key mutual exclusion.
///
/// Backends are chosen once at startup and used through `Arc<dyn Locker>`.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Wait until `key` is acquired or `ctx` is done.
    ///
    /// On success the handle carries a new context derived from `ctx`. When
    /// `ctx` ends first, `GlobalLockError::Cancelled` is returned and no
    /// context is created, so the caller keeps working with `ctx`.
    async fn lock(&self, ctx: &LockContext, key: &str) -> Result<LockHandle>;

    /// Acquire `key` only if it is free right now.
    ///
    /// Returns `Ok(None)` without waiting when the key is held elsewhere.
    async fn try_lock(&self, ctx: &LockContext, key: &str) -> Result<Option<LockHandle>>;

    /// Short backend name for logs and metrics
    fn backend(&self) -> &'static str;
}

pub(crate) fn cancelled(key: &str, cause: CancelCause) -> GlobalLockError {
    GlobalLockError::Cancelled {
        key: key.to_string(),
        cause,
    }
}
