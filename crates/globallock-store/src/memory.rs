//! In-memory lease store
//!
//! Single-process implementation of [`LeaseStore`]. It backs leased lockers
//! in single-node setups and in tests, and offers a few admin operations
//! (`force_release`, `get`, `stats`) the Redis store does not.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use globallock_common::StoreError;
use tokio::time::interval;
use tracing::{debug, info};

use crate::model::{AcquireOutcome, LeaseRecord, LeaseStats, LeaseToken, ReleaseOutcome};
use crate::store::LeaseStore;

/// In-memory lease store backed by `DashMap`
pub struct MemoryLeaseStore {
    leases: Arc<DashMap<String, LeaseRecord>>,
    stats: Arc<LeaseStatsCollector>,
    /// Background expiry scanner
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Default)]
struct LeaseStatsCollector {
    total_keys: AtomicU64,
    total_acquisitions: AtomicU64,
    total_releases: AtomicU64,
    total_renewals: AtomicU64,
    expired_leases: AtomicU64,
    busy_acquisitions: AtomicU64,
    rejected_renewals: AtomicU64,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            stats: Arc::new(LeaseStatsCollector::default()),
            cleanup_handle: None,
        }
    }

    /// Start a background task that reclaims expired leases
    pub fn with_cleanup(mut self, every: Duration) -> Self {
        let leases = self.leases.clone();
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                Self::cleanup_expired_leases(&leases, &stats);
            }
        });

        info!(interval_ms = every.as_millis() as u64, "Lease expiry scanner started");
        self.cleanup_handle = Some(handle);
        self
    }

    fn cleanup_expired_leases(
        leases: &DashMap<String, LeaseRecord>,
        stats: &LeaseStatsCollector,
    ) {
        let mut expired = 0u64;
        let mut alive = 0u64;

        for mut entry in leases.iter_mut() {
            if entry.owner.is_some() && entry.is_expired() {
                entry.force_release();
                expired += 1;
            } else if entry.is_held() {
                alive += 1;
            }
        }

        if expired > 0 {
            stats.expired_leases.fetch_add(expired, Ordering::Relaxed);
            debug!(count = expired, "Reclaimed expired leases");
        }

        metrics::gauge!("globallock_store_leases").set(alive as f64);
    }

    /// Snapshot of the lease on `key`
    pub fn get(&self, key: &str) -> Option<LeaseRecord> {
        self.leases.get(key).map(|l| l.clone())
    }

    /// Drop the lease on `key` regardless of owner (admin operation).
    ///
    /// Returns `true` if a live lease was removed.
    pub fn force_release(&self, key: &str) -> bool {
        if let Some(mut lease) = self.leases.get_mut(key)
            && lease.is_held()
        {
            lease.force_release();
            self.stats.total_releases.fetch_add(1, Ordering::Relaxed);
            info!(key = %key, "Lease force released");
            return true;
        }
        false
    }

    pub fn stats(&self) -> LeaseStats {
        let active_leases = self.leases.iter().filter(|l| l.is_held()).count() as u32;

        LeaseStats {
            total_keys: self.stats.total_keys.load(Ordering::Relaxed),
            active_leases,
            total_acquisitions: self.stats.total_acquisitions.load(Ordering::Relaxed),
            total_releases: self.stats.total_releases.load(Ordering::Relaxed),
            total_renewals: self.stats.total_renewals.load(Ordering::Relaxed),
            expired_leases: self.stats.expired_leases.load(Ordering::Relaxed),
            busy_acquisitions: self.stats.busy_acquisitions.load(Ordering::Relaxed),
            rejected_renewals: self.stats.rejected_renewals.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryLeaseStore {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<AcquireOutcome, StoreError> {
        let mut lease = self.leases.entry(key.to_string()).or_insert_with(|| {
            self.stats.total_keys.fetch_add(1, Ordering::Relaxed);
            LeaseRecord::new(key)
        });

        if lease.owner.is_some() && lease.is_expired() {
            lease.force_release();
            self.stats.expired_leases.fetch_add(1, Ordering::Relaxed);
        }

        let token = LeaseToken::generate();
        if lease.acquire(token.clone(), ttl) {
            self.stats
                .total_acquisitions
                .fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, fence_token = lease.fence_token, "Lease acquired");
            return Ok(AcquireOutcome::Acquired(token));
        }

        self.stats.busy_acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(AcquireOutcome::Busy)
    }

    async fn extend(
        &self,
        key: &str,
        token: &LeaseToken,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let renewed = self
            .leases
            .get_mut(key)
            .is_some_and(|mut lease| lease.renew(token, ttl));

        if renewed {
            self.stats.total_renewals.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.stats.rejected_renewals.fetch_add(1, Ordering::Relaxed);
            Err(StoreError::LeaseLost {
                key: key.to_string(),
            })
        }
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> Result<ReleaseOutcome, StoreError> {
        let released = self
            .leases
            .get_mut(key)
            .is_some_and(|mut lease| lease.release(token));

        if released {
            self.stats.total_releases.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Lease released");
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::AlreadyLost)
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
