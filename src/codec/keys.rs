use std::fmt;

use serde::{Deserialize, Serialize};

use super::{GroupKeyCodec, KeyCodec, KeyColumn, SqlValue};
use crate::types::{DbTreeError, Result};

/// Plain `i32` keys printed in decimal.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntKeyCodec;

const INT_COLUMNS: &[KeyColumn] = &[KeyColumn {
    name: "key",
    sql_type: "INTEGER NOT NULL",
}];

impl KeyCodec for IntKeyCodec {
    type Key = i32;

    fn name(&self) -> &'static str {
        "int"
    }

    fn parse(&self, text: &str) -> Result<i32> {
        text.trim()
            .parse()
            .map_err(|_| DbTreeError::codec("key", text))
    }

    fn encode(&self, key: &i32) -> String {
        key.to_string()
    }

    fn min_key(&self) -> i32 {
        i32::MIN
    }

    fn max_key(&self) -> i32 {
        i32::MAX
    }

    fn columns(&self) -> &'static [KeyColumn] {
        INT_COLUMNS
    }

    fn column_values(&self, key: &i32) -> Vec<SqlValue> {
        vec![SqlValue::Integer(i64::from(*key))]
    }
}

/// Composite key ordered by `x` then `y`; `x` is the group.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PairKey {
    /// Group component.
    pub x: i32,
    /// Least significant component.
    pub y: i32,
}

impl PairKey {
    /// Creates a key from its components.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}/{})", self.x, self.y)
    }
}

/// Codec for [`PairKey`] using the `(x/y)` text form.
#[derive(Clone, Copy, Debug, Default)]
pub struct PairKeyCodec;

const PAIR_COLUMNS: &[KeyColumn] = &[
    KeyColumn {
        name: "x",
        sql_type: "INTEGER NOT NULL",
    },
    KeyColumn {
        name: "y",
        sql_type: "INTEGER NOT NULL",
    },
];

impl KeyCodec for PairKeyCodec {
    type Key = PairKey;

    fn name(&self) -> &'static str {
        "pair"
    }

    fn parse(&self, text: &str) -> Result<PairKey> {
        let inner = text
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| DbTreeError::codec("key", text))?;
        let (x, y) = inner
            .split_once('/')
            .ok_or_else(|| DbTreeError::codec("key", text))?;
        let x = x.trim().parse().map_err(|_| DbTreeError::codec("key", text))?;
        let y = y.trim().parse().map_err(|_| DbTreeError::codec("key", text))?;
        Ok(PairKey { x, y })
    }

    fn encode(&self, key: &PairKey) -> String {
        key.to_string()
    }

    fn min_key(&self) -> PairKey {
        PairKey::new(i32::MIN, i32::MIN)
    }

    fn max_key(&self) -> PairKey {
        PairKey::new(i32::MAX, i32::MAX)
    }

    fn columns(&self) -> &'static [KeyColumn] {
        PAIR_COLUMNS
    }

    fn column_values(&self, key: &PairKey) -> Vec<SqlValue> {
        vec![
            SqlValue::Integer(i64::from(key.x)),
            SqlValue::Integer(i64::from(key.y)),
        ]
    }
}

impl GroupKeyCodec for PairKeyCodec {
    type Group = i32;
    type Part = i32;

    fn group(&self, key: &PairKey) -> i32 {
        key.x
    }

    fn least_significant(&self, key: &PairKey) -> i32 {
        key.y
    }

    fn bind(&self, group: &i32, part: &i32) -> PairKey {
        PairKey::new(*group, *part)
    }

    fn group_columns(&self) -> usize {
        1
    }

    fn part_values(&self, part: &i32) -> Vec<SqlValue> {
        vec![SqlValue::Integer(i64::from(*part))]
    }
}
