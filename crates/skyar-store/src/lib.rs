//! Durable job record store.
//!
//! This crate provides:
//! - An explicitly owned store instance (open, mutate, flush, close)
//! - Synchronous snapshot writes after every mutation
//! - Batch lookups derived from stored records

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{JobStore, PERSIST_FAILURES_TOTAL, SNAPSHOT_VERSION};
