//! Bulk construction of a whole tree in memory.
//!
//! Pairs are threaded one by one into a scratch hierarchy of [`BatchNode`]s that mirrors
//! the final tree: every node keeps its own pairs plus at most one descendant per gap
//! between them. Flattening then walks the hierarchy bottom-up, computing every
//! aggregate exactly once.

use super::element::Element;
use super::node::Node;
use crate::aggregate::Aggregator;
use crate::types::{Level, Result};

/// Construction-only node.
#[derive(Debug)]
pub(crate) struct BatchNode<K> {
    level: Level,
    k_min: K,
    k_max: K,
    pairs: Vec<(K, String)>,
    descendants: Vec<BatchNode<K>>,
}

impl<K: Ord + Clone> BatchNode<K> {
    /// Empty node spanning `(k_min, k_max)`.
    pub fn new(level: Level, k_min: K, k_max: K) -> Self {
        Self {
            level,
            k_min,
            k_max,
            pairs: Vec::new(),
            descendants: Vec::new(),
        }
    }

    fn with_pair(level: Level, k_min: K, k_max: K, key: K, value: String) -> Self {
        let mut node = Self::new(level, k_min, k_max);
        node.pairs.push((key, value));
        node
    }

    /// Adds `(key, value)` on `level` somewhere below or inside this node.
    ///
    /// `level` must not exceed the level of this node, and `key` must not be stored yet.
    pub fn insert(&mut self, key: K, value: String, level: Level) {
        if self.level == level {
            self.insert_pair(key.clone(), value);
            self.split_descendant(&key);
            return;
        }

        match self.covering_descendant(&key) {
            Some(index) if level > self.descendants[index].level => {
                // The new key lands between this node and the covering descendant.
                let covered = self.descendants.remove(index);
                let mut ancestor = Self::with_pair(
                    level,
                    covered.k_min.clone(),
                    covered.k_max.clone(),
                    key.clone(),
                    value,
                );
                let (left, right) = covered.split(&key);
                ancestor.descendants.extend(left);
                ancestor.descendants.extend(right);
                self.descendants.insert(index, ancestor);
            }
            Some(index) => self.descendants[index].insert(key, value, level),
            None => {
                let (k_min, k_max) = self.find_nearest(&key);
                let position = self.descendants.partition_point(|d| d.k_max <= key);
                self.descendants
                    .insert(position, Self::with_pair(level, k_min, k_max, key, value));
            }
        }
    }

    fn insert_pair(&mut self, key: K, value: String) {
        let position = self.pairs.partition_point(|(k, _)| k < &key);
        self.pairs.insert(position, (key, value));
    }

    fn covering_descendant(&self, key: &K) -> Option<usize> {
        self.descendants
            .iter()
            .position(|d| &d.k_min < key && key < &d.k_max)
    }

    /// Nearest own pair keys around `key`, or the node bounds.
    fn find_nearest(&self, key: &K) -> (K, K) {
        let position = self.pairs.partition_point(|(k, _)| k < key);
        let lower = match position {
            0 => self.k_min.clone(),
            i => self.pairs[i - 1].0.clone(),
        };
        let upper = self
            .pairs
            .get(position)
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| self.k_max.clone());
        (lower, upper)
    }

    /// Replaces the descendant straddling `key` by its two halves.
    fn split_descendant(&mut self, key: &K) {
        if let Some(index) = self.covering_descendant(key) {
            let straddling = self.descendants.remove(index);
            let (left, right) = straddling.split(key);
            let halves: Vec<_> = left.into_iter().chain(right).collect();
            self.descendants.splice(index..index, halves);
        }
    }

    /// Splits this subtree at `key` into the parts below and above it.
    ///
    /// A side without own pairs collapses into the matching half of the straddling
    /// descendant, which already carries the right bounds.
    fn split(self, key: &K) -> (Option<Self>, Option<Self>) {
        let (lower_pairs, upper_pairs): (Vec<_>, Vec<_>) =
            self.pairs.into_iter().partition(|(k, _)| k < key);

        let mut lower_desc = Vec::new();
        let mut upper_desc = Vec::new();
        let mut straddling = (None, None);
        for descendant in self.descendants {
            if &descendant.k_max <= key {
                lower_desc.push(descendant);
            } else if key <= &descendant.k_min {
                upper_desc.push(descendant);
            } else {
                straddling = descendant.split(key);
            }
        }
        let (straddle_left, straddle_right) = straddling;
        lower_desc.extend(straddle_left);
        if let Some(right) = straddle_right {
            upper_desc.insert(0, right);
        }

        let left = if lower_pairs.is_empty() {
            lower_desc.pop()
        } else {
            Some(Self {
                level: self.level,
                k_min: self.k_min,
                k_max: key.clone(),
                pairs: lower_pairs,
                descendants: lower_desc,
            })
        };
        let right = if upper_pairs.is_empty() {
            upper_desc.pop()
        } else {
            Some(Self {
                level: self.level,
                k_min: key.clone(),
                k_max: self.k_max,
                pairs: upper_pairs,
                descendants: upper_desc,
            })
        };
        (left, right)
    }

    /// Flattens the subtree into persisted nodes, children before parents, and returns
    /// the aggregate of the whole subtree.
    pub fn flatten<F: Aggregator>(
        self,
        agg: &F,
        out: &mut Vec<Node<K>>,
    ) -> Result<F::Partial> {
        let mut context = Vec::with_capacity(self.pairs.len() + self.descendants.len());
        let mut parts = Vec::with_capacity(context.capacity());
        let mut pairs = self.pairs.into_iter().peekable();
        let mut descendants = self.descendants.into_iter().peekable();
        loop {
            let descendant_first = match (descendants.peek(), pairs.peek()) {
                (Some(d), Some((k, _))) => &d.k_min < k,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if descendant_first {
                if let Some(descendant) = descendants.next() {
                    let partial = descendant.flatten(agg, out)?;
                    context.push(Element::aggregate(agg.encode_partial(&partial)));
                    parts.push(partial);
                }
            } else if let Some((key, value)) = pairs.next() {
                parts.push(agg.lift_text(&value)?);
                context.push(Element::pair(key, value));
            }
        }
        out.push(Node::new(self.level, self.k_min, self.k_max, context));
        Ok(agg.combine(&parts))
    }
}
