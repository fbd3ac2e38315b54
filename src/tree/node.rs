use crate::aggregate::Aggregator;
use crate::codec::KeyCodec;
use crate::types::{DbTreeError, Level, NodeId, Result, TOP_LEVEL};

use super::element::Element;
use super::row::NodeRow;

/// In-memory view of one persisted node.
///
/// The context alternates pairs and aggregates: `{a0?, p1, a1?, p2, .., pm, am?}`. An
/// aggregate between two pairs summarizes the lower-level content strictly between
/// their keys; `a0` covers `(k_min, p1)` and `am` covers `(pm, k_max)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node<K> {
    /// Level of the node.
    pub level: Level,
    /// Exclusive lower bound.
    pub k_min: K,
    /// Exclusive upper bound.
    pub k_max: K,
    context: Vec<Element<K>>,
}

impl<K: Ord + Clone> Node<K> {
    /// Creates a node from its parts.
    pub fn new(level: Level, k_min: K, k_max: K, context: Vec<Element<K>>) -> Self {
        Self {
            level,
            k_min,
            k_max,
            context,
        }
    }

    /// Decodes a wire row through `codec`.
    pub fn from_row<C>(row: &NodeRow, codec: &C) -> Result<Self>
    where
        C: KeyCodec<Key = K>,
    {
        let context = row
            .elements()?
            .into_iter()
            .map(|element| element.try_map_key(|key| codec.parse(&key)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            level: row.level,
            k_min: codec.parse(&row.k_min)?,
            k_max: codec.parse(&row.k_max)?,
            context,
        })
    }

    /// Encodes the node into its wire row.
    pub fn to_row<C>(&self, codec: &C) -> NodeRow
    where
        C: KeyCodec<Key = K>,
    {
        let context = NodeRow::join_context(
            self.context
                .iter()
                .map(|element| element.encode_with(|key| codec.encode(key))),
        );
        NodeRow::new(
            self.level,
            codec.encode(&self.k_min),
            codec.encode(&self.k_max),
            context,
        )
    }

    /// Persistence identity.
    pub fn id<C>(&self, codec: &C) -> NodeId
    where
        C: KeyCodec<Key = K>,
    {
        NodeId::new(
            self.level,
            codec.encode(&self.k_min),
            codec.encode(&self.k_max),
        )
    }

    /// Context elements in order.
    pub fn context(&self) -> &[Element<K>] {
        &self.context
    }

    /// Consumes the node, returning its context.
    pub fn into_context(self) -> Vec<Element<K>> {
        self.context
    }

    /// Number of context elements.
    pub fn len(&self) -> usize {
        self.context.len()
    }

    /// Returns true if the context is empty.
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }

    /// Returns true for the permanent root.
    pub fn is_top(&self) -> bool {
        self.level == TOP_LEVEL
    }

    /// Cursor over the context with pair lookahead and lookbehind.
    pub fn cursor(&self) -> NodeCursor<'_, K> {
        NodeCursor {
            context: &self.context,
            next: 0,
        }
    }

    /// Keys of all pairs, ascending.
    pub fn pair_keys(&self) -> impl Iterator<Item = &K> {
        self.context.iter().filter_map(Element::key)
    }

    /// Returns true if a pair with `key` is stored here.
    pub fn contains(&self, key: &K) -> bool {
        self.pair_keys().any(|k| k == key)
    }

    /// Value text stored for `key`.
    pub fn pair_value(&self, key: &K) -> Option<&str> {
        self.context.iter().find_map(|element| match element {
            Element::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// First pair key.
    pub fn first_key(&self) -> Option<&K> {
        self.pair_keys().next()
    }

    /// Last pair key.
    pub fn last_key(&self) -> Option<&K> {
        self.context.iter().rev().find_map(Element::key)
    }

    /// Tightest bracket `(k_i, k_i+1)` of own pair keys around `key`, falling back to
    /// `k_min` / `k_max` on a missing side.
    pub fn between(&self, key: &K) -> (K, K) {
        let mut lower = &self.k_min;
        let mut upper = &self.k_max;
        for k in self.pair_keys() {
            if k < key {
                lower = k;
            } else if key < k {
                upper = k;
                break;
            }
        }
        (lower.clone(), upper.clone())
    }

    /// Bounds of the key range covered by the element at `index`: nearest pair keys on
    /// each side, or the node bounds.
    pub fn slot_bounds(&self, index: usize) -> (&K, &K) {
        let lower = self.context[..index]
            .iter()
            .rev()
            .find_map(Element::key)
            .unwrap_or(&self.k_min);
        let upper = self.context[index + 1..]
            .iter()
            .find_map(Element::key)
            .unwrap_or(&self.k_max);
        (lower, upper)
    }

    /// `f` folded over the whole context: the contribution of this node's subtree.
    pub fn local_aggregate<F: Aggregator>(&self, agg: &F) -> Result<F::Partial> {
        let parts = self
            .context
            .iter()
            .map(|element| partial_of(agg, element))
            .collect::<Result<Vec<_>>>()?;
        Ok(agg.combine(&parts))
    }

    /// Creates or replaces `a0`.
    pub fn set_first_aggregate(&mut self, text: impl Into<String>) {
        match self.context.first_mut() {
            Some(first @ Element::Aggregate(_)) => first.set_value(text),
            _ => self.context.insert(0, Element::aggregate(text)),
        }
    }

    /// Creates or replaces `am`.
    pub fn set_last_aggregate(&mut self, text: impl Into<String>) {
        match self.context.last_mut() {
            Some(last @ Element::Aggregate(_)) => last.set_value(text),
            _ => self.context.push(Element::aggregate(text)),
        }
    }

    /// Writes `text` into the interior slot whose bracketing pairs surround `key`,
    /// inserting the aggregate if the slot is still empty.
    pub fn set_interior_aggregate(&mut self, key: &K, text: impl Into<String>) -> Result<()> {
        let mut cursor = self.cursor();
        let mut slot = None;
        while let Some(element) = cursor.next() {
            if let Element::Pair { key: k, .. } = element {
                let above = cursor.peek_next_pair().map(|(next, _)| next);
                if k < key && above.is_some_and(|next| key < next) {
                    slot = cursor.position().map(|pos| pos + 1);
                    break;
                }
            }
        }
        let slot = slot.ok_or_else(|| {
            DbTreeError::invariant("no interior aggregate slot brackets the repaired key")
        })?;
        match &mut self.context[slot] {
            element @ Element::Aggregate(_) => element.set_value(text),
            Element::Pair { .. } => self.context.insert(slot, Element::aggregate(text)),
        }
        Ok(())
    }

    /// Replaces the value of `key`. Returns false if the key is not stored here.
    pub fn update_value(&mut self, key: &K, text: impl Into<String>) -> bool {
        for element in &mut self.context {
            if element.key() == Some(key) {
                element.set_value(text);
                return true;
            }
        }
        false
    }

    /// Inserts a new pair at its sorted position, dropping the aggregate that
    /// bracketed the insertion point.
    pub fn insert_pair(&mut self, key: K, value: impl Into<String>) {
        let pos = self
            .context
            .iter()
            .position(|element| element.key().is_some_and(|k| &key < k));
        let pair = Element::pair(key, value);
        match pos {
            Some(pos) => {
                self.context.insert(pos, pair);
                if pos > 0 && self.context[pos - 1].is_aggregate() {
                    self.context.remove(pos - 1);
                }
            }
            None => {
                if self.context.last().is_some_and(Element::is_aggregate) {
                    self.context.pop();
                }
                self.context.push(pair);
            }
        }
    }

    /// Removes the pair for `key` and up to one aggregate on each side of it.
    /// Returns false if the key is not stored here.
    pub fn remove_pair_and_neighbor_aggregates(&mut self, key: &K) -> bool {
        let Some(pos) = self
            .context
            .iter()
            .position(|element| element.key() == Some(key))
        else {
            return false;
        };
        self.context.remove(pos);
        if self.context.get(pos).is_some_and(Element::is_aggregate) {
            self.context.remove(pos);
        }
        if pos > 0 && self.context[pos - 1].is_aggregate() {
            self.context.remove(pos - 1);
        }
        true
    }

    /// Removes the aggregate whose slot spans exactly `(lower, upper)`.
    pub fn remove_aggregate_between(&mut self, lower: &K, upper: &K) -> bool {
        let found = (0..self.context.len()).find(|&index| {
            self.context[index].is_aggregate() && {
                let (lo, hi) = self.slot_bounds(index);
                lo == lower && hi == upper
            }
        });
        match found {
            Some(index) => {
                self.context.remove(index);
                true
            }
            None => false,
        }
    }

    /// Maximal prefix of the context lying strictly below `key`, without the aggregate
    /// that straddles `key` and without a trailing aggregate.
    pub fn lower_partition(&self, key: &K) -> Vec<Element<K>> {
        let mut out = Vec::new();
        let mut cursor = self.cursor();
        while let Some(element) = cursor.next() {
            let keep = match element {
                Element::Pair { key: k, .. } => k < key,
                Element::Aggregate(_) => cursor
                    .peek_next_pair()
                    .is_some_and(|(next, _)| next < key),
            };
            if !keep {
                break;
            }
            out.push(element.clone());
        }
        out
    }

    /// Maximal suffix of the context lying strictly above `key`, starting at the first
    /// pair above `key`.
    pub fn higher_partition(&self, key: &K) -> Vec<Element<K>> {
        match self
            .context
            .iter()
            .position(|element| element.key().is_some_and(|k| key < k))
        {
            Some(start) => self.context[start..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Checks ordering, bounds and alternation of the context.
    pub fn validate(&self) -> Result<()> {
        let mut previous_key = &self.k_min;
        let mut previous_was_aggregate = false;
        for element in &self.context {
            match element {
                Element::Pair { key, .. } => {
                    if key <= previous_key {
                        return Err(DbTreeError::invariant(format!(
                            "pair keys out of order on level {}",
                            self.level
                        )));
                    }
                    previous_key = key;
                    previous_was_aggregate = false;
                }
                Element::Aggregate(_) => {
                    if previous_was_aggregate {
                        return Err(DbTreeError::invariant(format!(
                            "adjacent aggregates on level {}",
                            self.level
                        )));
                    }
                    previous_was_aggregate = true;
                }
            }
        }
        if self.last_key().is_some_and(|last| last >= &self.k_max) {
            return Err(DbTreeError::invariant(format!(
                "pair key reaches the upper bound on level {}",
                self.level
            )));
        }
        Ok(())
    }
}

/// Partial aggregate contributed by one element: `g(value)` for pairs, the parsed
/// aggregate otherwise.
pub(crate) fn partial_of<F: Aggregator, K>(agg: &F, element: &Element<K>) -> Result<F::Partial> {
    match element {
        Element::Pair { value, .. } => agg.lift_text(value),
        Element::Aggregate(text) => agg.parse_partial(text),
    }
}

/// Forward cursor over a node context.
///
/// Besides plain iteration it can look at the nearest pair after the current position
/// and the nearest pair before the element last returned, without moving.
pub struct NodeCursor<'a, K> {
    context: &'a [Element<K>],
    next: usize,
}

impl<'a, K> NodeCursor<'a, K> {
    /// Index of the element last returned by `next`.
    pub fn position(&self) -> Option<usize> {
        self.next.checked_sub(1)
    }

    /// Nearest pair after the element last returned.
    pub fn peek_next_pair(&self) -> Option<(&'a K, &'a str)> {
        self.context[self.next..].iter().find_map(as_pair)
    }

    /// Nearest pair before the element last returned.
    pub fn peek_prev_pair(&self) -> Option<(&'a K, &'a str)> {
        let current = self.position()?;
        self.context[..current].iter().rev().find_map(as_pair)
    }
}

fn as_pair<K>(element: &Element<K>) -> Option<(&K, &str)> {
    match element {
        Element::Pair { key, value } => Some((key, value.as_str())),
        Element::Aggregate(_) => None,
    }
}

impl<'a, K> Iterator for NodeCursor<'a, K> {
    type Item = &'a Element<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.context.get(self.next)?;
        self.next += 1;
        Some(element)
    }
}
