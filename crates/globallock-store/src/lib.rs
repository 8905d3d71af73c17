//! globallock Store - shared lease stores
//!
//! This crate provides:
//! - The `LeaseStore` capability consumed by leased lockers
//! - `MemoryLeaseStore`: single-process store with fence tokens and stats
//! - `RedisLeaseStore`: store on a Redis instance

mod memory;
mod model;
mod redis_store;
mod store;

pub use memory::MemoryLeaseStore;
pub use model::{AcquireOutcome, LeaseRecord, LeaseStats, LeaseToken, ReleaseOutcome};
pub use redis_store::{DEFAULT_KEY_PREFIX, RedisLeaseStore};
pub use store::LeaseStore;
