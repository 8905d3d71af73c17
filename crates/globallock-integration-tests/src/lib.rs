//! Behaviour every `Locker` backend must show
//!
//! Each function drives one scenario against a locker and panics on the
//! first violation. Keys are randomized so backends sharing a store can run
//! in parallel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use globallock_core::{
    CancelCause, LeaseLossReason, LeaseStore, LeasedLocker, LockContext, Locker,
};

pub fn unique_key(name: &str) -> String {
    format!("{name}-{}", uuid::Uuid::new_v4())
}

/// Blocking lock, a timed out second lock, idempotent release
pub async fn check_lock(locker: &dyn Locker) {
    let key = unique_key("lock");
    let parent = LockContext::background();

    let handle = locker.lock(&parent, &key).await.unwrap();
    let ctx = handle.context().clone();
    assert_ne!(ctx, parent, "a new context should be returned");

    {
        let parent = LockContext::background().with_timeout(Duration::from_secs(1));
        let err = locker.lock(&parent, &key).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(parent.is_done());
    }

    handle.release().await;
    assert!(ctx.is_done());
    // Safe to call multiple times
    handle.release().await;

    let again = locker.lock(&LockContext::background(), &key).await.unwrap();
    again.release().await;
}

/// Non-blocking acquisition and idempotent release
pub async fn check_try_lock(locker: &dyn Locker) {
    let key = unique_key("try-lock");
    let parent = LockContext::background();

    let handle = locker.try_lock(&parent, &key).await.unwrap().unwrap();
    let ctx = handle.context().clone();
    assert_ne!(ctx, parent, "a new context should be returned");

    {
        let parent = LockContext::background().with_timeout(Duration::from_secs(1));
        let second = locker.try_lock(&parent, &key).await.unwrap();
        assert!(second.is_none());
        assert!(!parent.is_done(), "a busy key must not wait");
    }

    handle.release().await;
    assert!(ctx.is_done());
    handle.release().await;

    let again = locker
        .try_lock(&LockContext::background(), &key)
        .await
        .unwrap();
    assert!(again.is_some());
}

/// A waiter blocks until the holder releases, then acquires
pub async fn check_wait_and_acquired(locker: Arc<dyn Locker>) {
    let key = unique_key("wait");
    let handle = locker.lock(&LockContext::background(), &key).await.unwrap();

    let waiter = {
        let locker = locker.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let handle = locker.lock(&LockContext::background(), &key).await.unwrap();
            let waited = started.elapsed();
            handle.release().await;
            waited
        })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.release().await;

    let waited = waiter.await.unwrap();
    assert!(waited > Duration::from_secs(1), "waited only {waited:?}");
}

/// Release hands back the parent context, which stays usable
pub async fn check_continue_after_release(locker: &dyn Locker) {
    let key = unique_key("continue");
    let before_lock = LockContext::background();

    let handle = locker.lock(&before_lock, &key).await.unwrap();
    let derived = handle.context().clone();
    assert!(!derived.is_done());
    assert_ne!(derived, before_lock);

    let ctx = handle.release().await;
    assert_eq!(ctx, before_lock);
    assert!(!ctx.is_done());
    assert_eq!(derived.cause(), Some(CancelCause::Released));
}

/// Repeated lock/release cycles on one key within a bounded context
pub async fn check_reacquire(locker: &dyn Locker) {
    let key = unique_key("alpha");
    let ctx = LockContext::background().with_timeout(Duration::from_secs(300));

    for _ in 0..5 {
        let handle = locker.lock(&ctx, &key).await.unwrap();
        assert!(handle.is_held());
        let returned = handle.release().await;
        assert_eq!(returned, ctx);
    }
}

/// Cancelling the parent ends the derived context but keeps the key owned
pub async fn check_parent_cancel(locker: &dyn Locker) {
    let key = unique_key("parent-cancel");
    let parent = LockContext::new();

    let handle = locker.lock(&parent, &key).await.unwrap();
    parent.cancel(CancelCause::Canceled);
    assert_eq!(handle.context().cause(), Some(CancelCause::Canceled));

    let other = locker
        .try_lock(&LockContext::background(), &key)
        .await
        .unwrap();
    assert!(other.is_none(), "ownership must survive parent cancellation");

    handle.release().await;
    let other = locker
        .try_lock(&LockContext::background(), &key)
        .await
        .unwrap();
    assert!(other.is_some());
}

/// At most one task is inside the critical section at a time
pub async fn check_mutual_exclusion(locker: Arc<dyn Locker>, tasks: usize, rounds: usize) {
    let key = unique_key("exclusive");
    let inside = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let mut joins = Vec::with_capacity(tasks);

    for _ in 0..tasks {
        let locker = locker.clone();
        let key = key.clone();
        let inside = inside.clone();
        let done = done.clone();
        joins.push(tokio::spawn(async move {
            for _ in 0..rounds {
                let handle = locker.lock(&LockContext::background(), &key).await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                handle.release().await;
            }
        }));
    }

    for join in joins {
        join.await.unwrap();
    }
    assert_eq!(done.load(Ordering::SeqCst), tasks * rounds);
}

/// Deleting the lease behind the holder's back cancels its context
///
/// Simulates a failing extension: once the store no longer records the
/// holder, the next renewal fails and the derived context ends with
/// `LeaseLost { reason: Taken }` within one expiry.
pub async fn check_missing_extension(locker: &LeasedLocker, store: &dyn LeaseStore) {
    let key = unique_key("missing-extension");
    let handle = locker.lock(&LockContext::background(), &key).await.unwrap();

    let token = locker.active_lease(&key).unwrap();
    store.release(&key, &token).await.unwrap();

    let limit = locker.expiry() + Duration::from_secs(1);
    let cause = tokio::time::timeout(limit, handle.context().cancelled())
        .await
        .expect("lease should have been reported lost");

    match cause {
        CancelCause::LeaseLost { key: lost, reason } => {
            assert_eq!(lost, key);
            assert_eq!(reason, LeaseLossReason::Taken);
        }
        other => panic!("unexpected cause: {other:?}"),
    }

    // Releasing after a loss is harmless
    handle.release().await;
    assert!(locker.active_lease(&key).is_none());
}
