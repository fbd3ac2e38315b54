//! Atomic context entries: key-value pairs and partial aggregates.
//!
//! Text framing is `P:(<key>,<value>)` for pairs and `A:<aggregate>` for aggregates.
//! The framing has no escaping: key text must not contain `,` or `;`, and value or
//! aggregate text must not contain `;`.

use std::fmt;

use crate::types::{DbTreeError, Result};

const PAIR_PREFIX: &str = "P:(";
const PAIR_SUFFIX: char = ')';
const AGGREGATE_PREFIX: &str = "A:";

/// One entry of a node context.
///
/// `K` is the key representation: `String` right after decoding, the parsed domain key
/// once a node has been built through a key codec. Values and aggregates always stay in
/// text form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Element<K = String> {
    /// A stored key-value pair.
    Pair {
        /// Key of the pair.
        key: K,
        /// Value text.
        value: String,
    },
    /// A partial aggregate summarizing content omitted from this node.
    Aggregate(String),
}

impl<K> Element<K> {
    /// Creates a pair element.
    pub fn pair(key: K, value: impl Into<String>) -> Self {
        Element::Pair {
            key,
            value: value.into(),
        }
    }

    /// Creates an aggregate element.
    pub fn aggregate(text: impl Into<String>) -> Self {
        Element::Aggregate(text.into())
    }

    /// Returns true for pair elements.
    pub fn is_pair(&self) -> bool {
        matches!(self, Element::Pair { .. })
    }

    /// Returns true for aggregate elements.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Element::Aggregate(_))
    }

    /// Key of a pair, `None` for aggregates.
    pub fn key(&self) -> Option<&K> {
        match self {
            Element::Pair { key, .. } => Some(key),
            Element::Aggregate(_) => None,
        }
    }

    /// Value text of a pair, or the aggregate text.
    pub fn value(&self) -> &str {
        match self {
            Element::Pair { value, .. } => value,
            Element::Aggregate(text) => text,
        }
    }

    /// Replaces the value part in place, keeping the key of a pair.
    pub fn set_value(&mut self, text: impl Into<String>) {
        match self {
            Element::Pair { value, .. } => *value = text.into(),
            Element::Aggregate(current) => *current = text.into(),
        }
    }

    /// Converts the key representation.
    pub fn try_map_key<T, E>(
        self,
        f: impl FnOnce(K) -> std::result::Result<T, E>,
    ) -> std::result::Result<Element<T>, E> {
        Ok(match self {
            Element::Pair { key, value } => Element::Pair { key: f(key)?, value },
            Element::Aggregate(text) => Element::Aggregate(text),
        })
    }

    /// Text form, printing the key with `encode_key`.
    pub fn encode_with(&self, encode_key: impl FnOnce(&K) -> String) -> String {
        match self {
            Element::Pair { key, value } => {
                format!("{PAIR_PREFIX}{},{value}{PAIR_SUFFIX}", encode_key(key))
            }
            Element::Aggregate(text) => format!("{AGGREGATE_PREFIX}{text}"),
        }
    }
}

impl Element<String> {
    /// Text form of an element whose key is already text.
    pub fn encode(&self) -> String {
        self.encode_with(|key| key.clone())
    }

    /// Parses the text form of an element.
    pub fn decode(text: &str) -> Result<Self> {
        if let Some(body) = text.strip_prefix(AGGREGATE_PREFIX) {
            return Ok(Element::Aggregate(body.to_owned()));
        }
        let body = text
            .strip_prefix(PAIR_PREFIX)
            .and_then(|rest| rest.strip_suffix(PAIR_SUFFIX))
            .ok_or_else(|| DbTreeError::MalformedElement(text.to_owned()))?;
        let (key, value) = body
            .split_once(',')
            .ok_or_else(|| DbTreeError::MalformedElement(text.to_owned()))?;
        Ok(Element::Pair {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }
}

impl fmt::Display for Element<String> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Rejects key text the framing cannot carry.
pub(crate) fn check_key_text(text: &str) -> Result<()> {
    if text.contains([',', ';']) {
        return Err(DbTreeError::MalformedElement(format!(
            "key text {text:?} contains a delimiter"
        )));
    }
    Ok(())
}

/// Rejects value or aggregate text the framing cannot carry.
pub(crate) fn check_value_text(text: &str) -> Result<()> {
    if text.contains(';') {
        return Err(DbTreeError::MalformedElement(format!(
            "value text {text:?} contains a delimiter"
        )));
    }
    Ok(())
}
