#![forbid(unsafe_code)]

//! Shared identifiers and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Level of a node. Keys land on non-negative levels; the permanent root sits on
/// [`TOP_LEVEL`].
pub type Level = i64;

/// Level of the permanent root node, conceptually `+inf`.
pub const TOP_LEVEL: Level = i64::MAX;

/// Persistence identity of a node: `(level, k_min, k_max)` with keys in text form.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Level of the node.
    pub level: Level,
    /// Encoded lower bound.
    pub k_min: String,
    /// Encoded upper bound.
    pub k_max: String,
}

impl NodeId {
    /// Builds an identifier from its parts.
    pub fn new(level: Level, k_min: impl Into<String>, k_max: impl Into<String>) -> Self {
        Self {
            level,
            k_min: k_min.into(),
            k_max: k_max.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.level == TOP_LEVEL {
            write!(f, "top[{}, {}]", self.k_min, self.k_max)
        } else {
            write!(f, "{}[{}, {}]", self.level, self.k_min, self.k_max)
        }
    }
}

/// Errors surfaced by DB-tree operations.
#[derive(thiserror::Error, Debug)]
pub enum DbTreeError {
    /// Element text does not follow the `A:` / `P:(..)` framing, or a text cannot be framed.
    #[error("malformed element: {0}")]
    MalformedElement(String),
    /// A key, value or aggregate text could not be parsed by its codec.
    #[error("cannot parse {what} from {text:?}")]
    Codec {
        /// Kind of text that failed (`key`, `value`, `aggregate`).
        what: &'static str,
        /// Offending text.
        text: String,
    },
    /// A structural invariant or an operation precondition does not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The persistence boundary failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DbTreeError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        DbTreeError::InvariantViolation(msg.into())
    }

    pub(crate) fn codec(what: &'static str, text: &str) -> Self {
        DbTreeError::Codec {
            what,
            text: text.to_owned(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbTreeError>;
