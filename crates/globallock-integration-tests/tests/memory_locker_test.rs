// Integration tests for the in-process locker
// Runs the shared locker behaviour against MemoryLocker

use std::sync::Arc;

use globallock_core::{Locker, MemoryLocker};
use globallock_integration_tests as contract;

#[tokio::test]
async fn test_lock() {
    contract::check_lock(&MemoryLocker::new()).await;
}

#[tokio::test]
async fn test_try_lock() {
    contract::check_try_lock(&MemoryLocker::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_and_acquired() {
    contract::check_wait_and_acquired(Arc::new(MemoryLocker::new())).await;
}

#[tokio::test]
async fn test_continue_after_release() {
    contract::check_continue_after_release(&MemoryLocker::new()).await;
}

#[tokio::test]
async fn test_reacquire() {
    contract::check_reacquire(&MemoryLocker::new()).await;
}

#[tokio::test]
async fn test_parent_cancel_keeps_ownership() {
    contract::check_parent_cancel(&MemoryLocker::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion() {
    let locker: Arc<dyn Locker> = Arc::new(MemoryLocker::new());
    contract::check_mutual_exclusion(locker, 16, 20).await;
}
