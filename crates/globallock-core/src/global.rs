//! Process-wide default locker and scoped helpers

use std::future::Future;
use std::sync::{Arc, OnceLock};

use globallock_common::{GlobalLockError, LockContext, Result};
use tracing::{info, warn};

use crate::config::{GlobalLockConfig, new_locker};
use crate::handle::LockHandle;
use crate::locker::Locker;
use crate::memory::MemoryLocker;

static DEFAULT_LOCKER: OnceLock<Arc<dyn Locker>> = OnceLock::new();

/// Build the locker described by `config` and install it as the default.
///
/// Only the first successful call installs a locker; later calls log a
/// warning and keep the existing one.
pub async fn init_default_locker(config: &GlobalLockConfig) -> Result<()> {
    if DEFAULT_LOCKER.get().is_some() {
        warn!("Default locker already initialized, ignoring new configuration");
        return Ok(());
    }

    let locker = new_locker(config).await?;
    let backend = locker.backend();
    if DEFAULT_LOCKER.set(locker).is_err() {
        warn!("Default locker already initialized, ignoring new configuration");
    } else {
        info!(backend, "Default locker installed");
    }
    Ok(())
}

/// The installed default locker, or an in-process one if none was installed
pub fn default_locker() -> Arc<dyn Locker> {
    DEFAULT_LOCKER
        .get_or_init(|| Arc::new(MemoryLocker::new()))
        .clone()
}

/// [`Locker::lock`] on the default locker
pub async fn lock(ctx: &LockContext, key: &str) -> Result<LockHandle> {
    default_locker().lock(ctx, key).await
}

/// [`Locker::try_lock`] on the default locker
pub async fn try_lock(ctx: &LockContext, key: &str) -> Result<Option<LockHandle>> {
    default_locker().try_lock(ctx, key).await
}

/// Run `f` while holding `key`.
///
/// `f` receives the derived context and should stop when it is done. The
/// lock is released whether `f` succeeds or fails.
pub async fn lock_and_do<T, F, Fut>(
    locker: &dyn Locker,
    ctx: &LockContext,
    key: &str,
    f: F,
) -> Result<T>
where
    F: FnOnce(LockContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let handle = locker.lock(ctx, key).await?;
    run_and_release(handle, f).await
}

/// Run `f` only if `key` is free right now; `Ok(None)` when it is held elsewhere
pub async fn try_lock_and_do<T, F, Fut>(
    locker: &dyn Locker,
    ctx: &LockContext,
    key: &str,
    f: F,
) -> Result<Option<T>>
where
    F: FnOnce(LockContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match locker.try_lock(ctx, key).await? {
        Some(handle) => run_and_release(handle, f).await.map(Some),
        None => Ok(None),
    }
}

async fn run_and_release<T, F, Fut>(handle: LockHandle, f: F) -> Result<T>
where
    F: FnOnce(LockContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let result = f(handle.context().clone()).await;
    handle.release().await;
    result.map_err(GlobalLockError::from)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use globallock_common::CancelCause;

    use super::*;

    #[tokio::test]
    async fn test_lock_and_do_releases() {
        let locker = MemoryLocker::new();
        let ctx = LockContext::background();

        let value = lock_and_do(&locker, &ctx, "job", |derived| async move {
            assert!(!derived.is_done());
            Ok(42)
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert!(locker.try_lock(&ctx, "job").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_and_do_releases_on_error() {
        let locker = MemoryLocker::new();
        let ctx = LockContext::background();

        let err = lock_and_do(&locker, &ctx, "job", |_| async {
            Err::<(), _>(anyhow::anyhow!("boom"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GlobalLockError::Other(_)));
        assert!(locker.try_lock(&ctx, "job").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_derived_context_done_after_helper() {
        let locker = MemoryLocker::new();
        let ctx = LockContext::background();

        let derived = lock_and_do(&locker, &ctx, "job", |derived| async move { Ok(derived) })
            .await
            .unwrap();
        assert_eq!(derived.cause(), Some(CancelCause::Released));
    }

    #[tokio::test]
    async fn test_try_lock_and_do_skips_when_busy() {
        let locker = MemoryLocker::new();
        let ctx = LockContext::background();
        let _held = locker.lock(&ctx, "job").await.unwrap();

        let ran = AtomicBool::new(false);
        let result = try_lock_and_do(&locker, &ctx, "job", |_| async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert!(result.is_none());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_default_locker_lock_and_try_lock() {
        let ctx = LockContext::background();
        assert!(init_default_locker(&GlobalLockConfig::default()).await.is_ok());

        let handle = lock(&ctx, "global-default-key").await.unwrap();
        assert!(try_lock(&ctx, "global-default-key").await.unwrap().is_none());
        handle.release().await;
        assert!(try_lock(&ctx, "global-default-key").await.unwrap().is_some());

        // A second init keeps the installed locker
        assert!(init_default_locker(&GlobalLockConfig::default()).await.is_ok());
        assert!(Arc::ptr_eq(&default_locker(), &default_locker()));
    }
}
