//! Low-level building blocks shared by the tree and the stores.

/// Structured fan-out for concurrent store reads.
pub mod concurrency;
