//! In-memory part of range and group-by queries.
//!
//! A range `[k1, k2]` is answered from three node sets:
//!
//! * `L`, the nodes with `k_min < k1 < k_max <= k2`, ascending level. They hold the
//!   content right of `k1` that ends before `k2`.
//! * `R`, the nodes with `k1 <= k_min < k2 < k_max`, ascending level. They hold the
//!   content left of `k2` that starts at or after `k1`.
//! * `n̄`, the lowest node with `k_min < k1` and `k2 < k_max`, which holds the middle.
//!
//! The three contributions never overlap, so folding them with `f` gives the aggregate
//! over exactly the keys in `[k1, k2]`.

use tracing::trace;

use super::element::Element;
use super::node::{partial_of, Node};
use crate::aggregate::Aggregator;
use crate::types::Result;

/// Nodes fetched for one range.
#[derive(Debug)]
pub(crate) struct RangeNodes<K> {
    pub left: Vec<Node<K>>,
    pub right: Vec<Node<K>>,
    pub nbar: Option<Node<K>>,
}

impl<K: Ord + Clone> RangeNodes<K> {
    /// Keeps only the nodes that satisfy the exact `L` / `R` / `n̄` predicates for
    /// `[k1, k2]`. Group-by fetches return supersets spanning several groups.
    pub fn restricted_to(
        left: &[Node<K>],
        right: &[Node<K>],
        nbar: Option<Node<K>>,
        k1: &K,
        k2: &K,
    ) -> Self {
        Self {
            left: left
                .iter()
                .filter(|n| &n.k_min < k1 && k1 < &n.k_max && &n.k_max <= k2)
                .cloned()
                .collect(),
            right: right
                .iter()
                .filter(|n| k1 <= &n.k_min && &n.k_min < k2 && k2 < &n.k_max)
                .cloned()
                .collect(),
            nbar,
        }
    }
}

/// Raw aggregate (before `h`) of every pair with a key in `[k1, k2]`.
pub(crate) fn fold_range<K, F>(
    agg: &F,
    nodes: &RangeNodes<K>,
    k1: &K,
    k2: &K,
) -> Result<F::Partial>
where
    K: Ord + Clone,
    F: Aggregator,
{
    let left = fold_left(agg, &nodes.left, k1)?;
    let right = fold_right(agg, &nodes.right, k2)?;

    let mut parts = vec![left];
    if let Some(nbar) = &nodes.nbar {
        let mut cursor = nbar.cursor();
        while let Some(element) = cursor.next() {
            let included = match element {
                Element::Pair { key, .. } => k1 <= key && key <= k2,
                Element::Aggregate(_) => {
                    let Some(pos) = cursor.position() else { continue };
                    let (lower, upper) = nbar.slot_bounds(pos);
                    k1 <= lower && upper <= k2
                }
            };
            if included {
                parts.push(partial_of(agg, element)?);
            }
        }
        trace!(level = nbar.level, parts = parts.len() - 1, "dbtree.query.nbar");
    }
    parts.push(right);
    Ok(agg.combine(&parts))
}

/// Left fringe: everything at or after `k1` in each node, lower levels first.
fn fold_left<K, F>(agg: &F, left: &[Node<K>], k1: &K) -> Result<F::Partial>
where
    K: Ord + Clone,
    F: Aggregator,
{
    let mut running = agg.identity();
    for node in left {
        let mut parts = vec![running];
        let mut scrolling = &node.k_min;
        for element in node.context() {
            if let Element::Pair { key, .. } = element {
                scrolling = key;
            }
            if scrolling >= k1 {
                parts.push(partial_of(agg, element)?);
            }
        }
        running = agg.combine(&parts);
    }
    Ok(running)
}

/// Right fringe: everything up to `k2` in each node; the lower-level remainder comes
/// after it in key order.
fn fold_right<K, F>(agg: &F, right: &[Node<K>], k2: &K) -> Result<F::Partial>
where
    K: Ord + Clone,
    F: Aggregator,
{
    let mut running = agg.identity();
    for node in right {
        let mut parts = Vec::new();
        let mut cursor = node.cursor();
        while let Some(element) = cursor.next() {
            let included = match element {
                Element::Pair { key, .. } => key <= k2,
                Element::Aggregate(_) => cursor
                    .peek_next_pair()
                    .is_some_and(|(next, _)| next <= k2),
            };
            if !included {
                break;
            }
            parts.push(partial_of(agg, element)?);
        }
        parts.push(running);
        running = agg.combine(&parts);
    }
    Ok(running)
}
