// Integration tests for the leased locker on the in-memory lease store
// Covers the shared locker behaviour plus lease loss detection

use std::sync::Arc;
use std::time::Duration;

use globallock_core::{LeasedLocker, LockContext, Locker, MemoryLeaseStore};
use globallock_integration_tests as contract;

fn locker() -> LeasedLocker {
    LeasedLocker::with_expiry(Arc::new(MemoryLeaseStore::new()), Duration::from_secs(3))
}

#[tokio::test]
async fn test_lock() {
    contract::check_lock(&locker()).await;
}

#[tokio::test]
async fn test_try_lock() {
    contract::check_try_lock(&locker()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_and_acquired() {
    contract::check_wait_and_acquired(Arc::new(locker())).await;
}

#[tokio::test]
async fn test_continue_after_release() {
    contract::check_continue_after_release(&locker()).await;
}

#[tokio::test]
async fn test_reacquire() {
    contract::check_reacquire(&locker()).await;
}

#[tokio::test]
async fn test_parent_cancel_keeps_ownership() {
    contract::check_parent_cancel(&locker()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion() {
    let locker: Arc<dyn Locker> = Arc::new(locker());
    contract::check_mutual_exclusion(locker, 4, 5).await;
}

#[tokio::test]
async fn test_missing_extension() {
    let store = Arc::new(MemoryLeaseStore::new());
    let locker = LeasedLocker::with_expiry(store.clone(), Duration::from_secs(3));
    contract::check_missing_extension(&locker, store.as_ref()).await;
}

#[tokio::test]
async fn test_forced_unlock_lets_another_holder_in() {
    let store = Arc::new(MemoryLeaseStore::new());
    let first = LeasedLocker::with_expiry(store.clone(), Duration::from_secs(3));
    let second = LeasedLocker::with_expiry(store.clone(), Duration::from_secs(3));
    let key = contract::unique_key("forced");

    let handle = first.lock(&LockContext::background(), &key).await.unwrap();
    assert!(second.try_lock(&LockContext::background(), &key).await.unwrap().is_none());

    assert!(store.force_release(&key));
    let taken = second.try_lock(&LockContext::background(), &key).await.unwrap();
    assert!(taken.is_some());

    // The first holder learns about it at its next renewal
    let cause = tokio::time::timeout(Duration::from_secs(4), handle.context().cancelled())
        .await
        .unwrap();
    assert!(cause.is_lease_lost());
}
