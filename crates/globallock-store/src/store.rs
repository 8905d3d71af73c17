//! Lease store capability

use std::time::Duration;

use async_trait::async_trait;
use globallock_common::StoreError;

use crate::model::{AcquireOutcome, LeaseToken, ReleaseOutcome};

/// Shared store offering single-owner, expiring keys.
///
/// All three operations must be atomic in the store: set-if-absent with
/// expiry, extend-expiry-if-owner and delete-if-owner.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Create a lease on `key` that lapses after `ttl` unless extended
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<AcquireOutcome, StoreError>;

    /// Reset the lease expiry to `ttl` from now.
    ///
    /// Fails with `StoreError::LeaseLost` when `token` no longer owns the key.
    async fn extend(&self, key: &str, token: &LeaseToken, ttl: Duration)
    -> Result<(), StoreError>;

    /// Delete the lease if `token` still owns it
    async fn release(&self, key: &str, token: &LeaseToken) -> Result<ReleaseOutcome, StoreError>;

    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;
}
