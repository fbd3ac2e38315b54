//! Authenticated, aggregation-aware DB-tree.
//!
//! A [`DbTree`](tree::DbTree) stores key/value pairs in a probabilistically balanced,
//! skip-list-shaped tree whose nodes cache partial aggregates of their subtrees. Range
//! aggregates are answered from a handful of nodes, per-group aggregates for composite
//! keys come from one pass, and point lookups can return a proof that replays to the
//! root aggregate.
//!
//! ```no_run
//! use dbtree::aggregate::Sum;
//! use dbtree::codec::IntKeyCodec;
//! use dbtree::store::MemoryStore;
//! use dbtree::tree::{DbTree, DbTreeOptions};
//!
//! # fn main() -> dbtree::types::Result<()> {
//! let mut tree = DbTree::open(Sum, MemoryStore::new(IntKeyCodec), DbTreeOptions::default())?;
//! for key in 1..=100 {
//!     tree.insert(key, &key)?;
//! }
//! assert_eq!(tree.range_query(&10, &20)?, 165);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod aggregate;
pub mod codec;
pub mod config;
pub mod primitives;
pub mod store;
pub mod tree;
pub mod types;

pub use config::{Config, ConfigError};
pub use tree::{DbTree, DbTreeOptions};
pub use types::{DbTreeError, Result};
