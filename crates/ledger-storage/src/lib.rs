//! Durable stores backing the reconciliation loop.
//!
//! The chain itself is never written here: only the pending queue, the
//! checkpoint and the vote annotations outlive the process.

pub mod sled_store;

pub use sled_store::SledStore;
