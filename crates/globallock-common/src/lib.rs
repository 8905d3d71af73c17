//! globallock Common - shared types for the lock crates
//!
//! This crate provides:
//! - `LockContext`: cancellable execution context used as the ownership signal
//! - Cancel causes and lease loss classification
//! - Error types shared by stores and lockers

pub mod context;
pub mod error;

pub use context::LockContext;
pub use error::{CancelCause, GlobalLockError, LeaseLossReason, Result, StoreError};
