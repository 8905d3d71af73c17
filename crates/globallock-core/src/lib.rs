//! globallock Core - per-key global locks
//!
//! This crate provides:
//! - The `Locker` capability and the `LockHandle` it returns
//! - `MemoryLocker`: exclusion within one process
//! - `LeasedLocker`: exclusion across processes via a shared lease store
//! - A process-wide default locker and scoped helpers
//! - Configuration, logging setup and metrics

pub mod config;
pub mod global;
pub mod handle;
pub mod leased;
pub mod locker;
pub mod logging;
pub mod memory;
pub mod metrics;

pub use config::{GlobalLockConfig, ServiceType, new_locker};
pub use global::{
    default_locker, init_default_locker, lock, lock_and_do, try_lock, try_lock_and_do,
};
pub use handle::LockHandle;
pub use leased::{DEFAULT_LEASE_EXPIRY, LeasedLocker};
pub use locker::Locker;
pub use memory::MemoryLocker;

// Re-export the shared types callers need alongside a locker
pub use globallock_common::{
    CancelCause, GlobalLockError, LeaseLossReason, LockContext, Result, StoreError,
};
pub use globallock_store::{LeaseStore, MemoryLeaseStore, RedisLeaseStore};
