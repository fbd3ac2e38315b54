//! Key codecs: how domain keys are parsed, printed, bounded and laid out in store columns.
//!
//! A [`KeyCodec`] is the base capability every tree needs. Composite keys that can be
//! split into a group and a least significant part additionally implement
//! [`GroupKeyCodec`], which unlocks group-by range queries at compile time.

use std::fmt;

mod keys;

pub use keys::{IntKeyCodec, PairKey, PairKeyCodec};

use crate::types::Result;

/// A single typed column value handed to a store when it binds a key into a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlValue {
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 text compared bytewise.
    Text(String),
}

/// Column layout used by relational stores for one component of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyColumn {
    /// Column suffix; stores prefix it with `min_` / `max_`.
    pub name: &'static str,
    /// Column type declaration.
    pub sql_type: &'static str,
}

/// Trait implemented by key adapters.
///
/// The ordering of [`KeyCodec::Key`] must agree with the lexicographic ordering of
/// [`KeyCodec::column_values`], since relational stores compare keys through those columns.
pub trait KeyCodec: Send + Sync + 'static {
    /// Domain key type.
    type Key: Ord + Clone + fmt::Debug + Send + Sync;

    /// Short, stable name used to derive store table names.
    fn name(&self) -> &'static str;

    /// Parse a key from its text form.
    fn parse(&self, text: &str) -> Result<Self::Key>;

    /// Print a key in its text form.
    fn encode(&self, key: &Self::Key) -> String;

    /// Global minimum sentinel, strictly below every storable key.
    fn min_key(&self) -> Self::Key;

    /// Global maximum sentinel, strictly above every storable key.
    fn max_key(&self) -> Self::Key;

    /// Column layout, most significant first.
    fn columns(&self) -> &'static [KeyColumn];

    /// Column values for `key`, in [`KeyCodec::columns`] order.
    fn column_values(&self, key: &Self::Key) -> Vec<SqlValue>;
}

/// Extension capability for composite keys `(group, least significant part)`.
pub trait GroupKeyCodec: KeyCodec {
    /// Most significant part of a key.
    type Group: Ord + Clone + fmt::Debug + Send + Sync;
    /// Least significant part of a key.
    type Part: Ord + Clone + fmt::Debug + Send + Sync;

    /// Group of `key`.
    fn group(&self, key: &Self::Key) -> Self::Group;

    /// Least significant part of `key`.
    fn least_significant(&self, key: &Self::Key) -> Self::Part;

    /// Rebuild a key from its two parts.
    fn bind(&self, group: &Self::Group, part: &Self::Part) -> Self::Key;

    /// How many leading entries of [`KeyCodec::columns`] make up the group.
    fn group_columns(&self) -> usize;

    /// Column values of a least significant part, matching the trailing key columns.
    fn part_values(&self, part: &Self::Part) -> Vec<SqlValue>;
}
