use serde::{Deserialize, Serialize};

use super::element::Element;
use crate::types::{Level, NodeId, Result};

/// Separator between element encodings inside a context string.
pub const CONTEXT_SEPARATOR: char = ';';

/// Wire form of a node: keys and context kept as text.
///
/// `context` is every element encoding followed by `;`, e.g. `A:4;P:(7,1);A:2;`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRow {
    /// Level of the node.
    pub level: Level,
    /// Encoded lower bound.
    pub k_min: String,
    /// Encoded upper bound.
    pub k_max: String,
    /// `;`-terminated element encodings.
    pub context: String,
}

impl NodeRow {
    /// Creates a row from its parts.
    pub fn new(
        level: Level,
        k_min: impl Into<String>,
        k_max: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            level,
            k_min: k_min.into(),
            k_max: k_max.into(),
            context: context.into(),
        }
    }

    /// Persistence identity of the row.
    pub fn id(&self) -> NodeId {
        NodeId::new(self.level, self.k_min.clone(), self.k_max.clone())
    }

    /// Decodes the context into elements. Empty segments are skipped.
    pub fn elements(&self) -> Result<Vec<Element>> {
        self.context
            .split(CONTEXT_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(Element::decode)
            .collect()
    }

    /// Joins element encodings into the context string form.
    pub fn join_context<I, S>(encodings: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut context = String::new();
        for encoding in encodings {
            context.push_str(encoding.as_ref());
            context.push(CONTEXT_SEPARATOR);
        }
        context
    }
}
