//! Error types for globallock
//!
//! This module defines:
//! - `GlobalLockError`: errors returned synchronously by lock operations
//! - `StoreError`: failures reported by a lease store
//! - `CancelCause`: why a `LockContext` ended
//! - `LeaseLossReason`: classification of involuntary lease loss

use std::fmt::{Display, Formatter};

/// Errors returned from `lock`, `try_lock` and the helpers built on them
#[derive(thiserror::Error, Debug)]
pub enum GlobalLockError {
    #[error("lock '{key}' not acquired: {cause}")]
    Cancelled { key: String, cause: CancelCause },

    #[error("lease store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GlobalLockError {
    /// Stable label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GlobalLockError::Cancelled { cause, .. } => cause.kind(),
            GlobalLockError::Store(e) => e.kind(),
            GlobalLockError::Config(_) => "config",
            GlobalLockError::Other(_) => "other",
        }
    }

    /// Whether the caller's context ended before the key was obtained
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GlobalLockError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, GlobalLockError>;

/// Failures reported by a lease store
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The lease does not exist or is owned by another token
    #[error("lease '{key}' is not owned by this holder")]
    LeaseLost { key: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store request timed out")]
    Timeout,
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::LeaseLost { .. } => "lease_lost",
            StoreError::Unavailable(_) => "store_unavailable",
            StoreError::Timeout => "store_timeout",
        }
    }
}

/// Why a lease held by this process ended without a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseLossReason {
    /// The store no longer records this holder as the owner
    Taken,
    /// The store could not be reached or answered with an error
    Unavailable(String),
    /// A renewal did not complete before its deadline
    Timeout,
}

impl LeaseLossReason {
    pub fn kind(&self) -> &'static str {
        match self {
            LeaseLossReason::Taken => "taken",
            LeaseLossReason::Unavailable(_) => "unavailable",
            LeaseLossReason::Timeout => "timeout",
        }
    }
}

impl Display for LeaseLossReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseLossReason::Taken => write!(f, "lease taken"),
            LeaseLossReason::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            LeaseLossReason::Timeout => write!(f, "renewal timed out"),
        }
    }
}

impl From<StoreError> for LeaseLossReason {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::LeaseLost { .. } => LeaseLossReason::Taken,
            StoreError::Unavailable(msg) => LeaseLossReason::Unavailable(msg),
            StoreError::Timeout => LeaseLossReason::Timeout,
        }
    }
}

/// Why a `LockContext` was cancelled
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The lock was released by its holder
    #[error("lock released")]
    Released,

    /// Ownership ended without a release
    #[error("lease '{key}' lost: {reason}")]
    LeaseLost { key: String, reason: LeaseLossReason },
}

impl CancelCause {
    pub fn kind(&self) -> &'static str {
        match self {
            CancelCause::Canceled => "canceled",
            CancelCause::DeadlineExceeded => "deadline_exceeded",
            CancelCause::Released => "released",
            CancelCause::LeaseLost { .. } => "lease_lost",
        }
    }

    pub fn is_lease_lost(&self) -> bool {
        matches!(self, CancelCause::LeaseLost { .. })
    }
}
