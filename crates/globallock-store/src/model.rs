//! Lease data model

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Opaque proof of ownership handed out by a store on acquisition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LeaseToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for LeaseToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a lease acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lease is now held under this token
    Acquired(LeaseToken),
    /// Another holder owns a live lease on the key
    Busy,
}

/// Result of a lease release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The lease had already expired or belongs to someone else
    AlreadyLost,
}

/// Lease entry kept by the in-memory store
#[derive(Debug, Clone)]
pub struct LeaseRecord {
    /// Lock key
    pub key: String,
    /// Current owner
    pub owner: Option<LeaseToken>,
    /// Fence token (monotonically increasing per key, bumped on acquisition)
    pub fence_token: u64,
    /// When the current owner acquired the lease
    pub acquired_at: Option<Instant>,
    /// When the current lease lapses unless extended
    pub expires_at: Option<Instant>,
    /// Number of extensions since acquisition
    pub renewal_count: u32,
}

impl LeaseRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            owner: None,
            fence_token: 0,
            acquired_at: None,
            expires_at: None,
            renewal_count: 0,
        }
    }

    /// Check if the lease is currently held
    pub fn is_held(&self) -> bool {
        self.owner.is_some() && !self.is_expired()
    }

    /// Check if the lease has lapsed
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    /// Check if the given token holds this lease
    pub fn is_owned_by(&self, token: &LeaseToken) -> bool {
        self.is_held() && self.owner.as_ref() == Some(token)
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Take the lease for `token` if it is free or expired
    pub fn acquire(&mut self, token: LeaseToken, ttl: Duration) -> bool {
        if self.is_held() {
            return false;
        }

        let now = Instant::now();
        self.owner = Some(token);
        self.acquired_at = Some(now);
        self.expires_at = Some(now + ttl);
        self.fence_token += 1;
        self.renewal_count = 0;
        true
    }

    /// Push the expiry forward; only the live owner may do so
    pub fn renew(&mut self, token: &LeaseToken, ttl: Duration) -> bool {
        if !self.is_owned_by(token) {
            return false;
        }

        self.expires_at = Some(Instant::now() + ttl);
        self.renewal_count += 1;
        true
    }

    pub fn release(&mut self, token: &LeaseToken) -> bool {
        if !self.is_owned_by(token) {
            return false;
        }

        self.clear();
        true
    }

    /// Drop the lease regardless of owner (admin operation)
    pub fn force_release(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.owner = None;
        self.acquired_at = None;
        self.expires_at = None;
    }
}

/// Lease store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaseStats {
    /// Keys ever seen by the store
    pub total_keys: u64,
    /// Currently held leases
    pub active_leases: u32,
    pub total_acquisitions: u64,
    pub total_releases: u64,
    pub total_renewals: u64,
    /// Leases reclaimed after their expiry passed
    pub expired_leases: u64,
    /// Acquisitions refused because the key was held
    pub busy_acquisitions: u64,
    /// Extensions refused because the caller no longer owned the lease
    pub rejected_renewals: u64,
}
