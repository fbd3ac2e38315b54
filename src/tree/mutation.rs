//! Structural mutations: every planner takes the node set fetched for one key, edits it in
//! memory, repairs the aggregates along the touched paths and returns the nodes to
//! create, rewrite and drop.

use tracing::trace;

use super::element::Element;
use super::node::Node;
use super::repair::repair_ancestors;
use crate::aggregate::Aggregator;
use crate::codec::KeyCodec;
use crate::store::Delta;
use crate::types::{DbTreeError, Level, NodeId, Result};

/// In-memory outcome of one mutation, still keyed by domain keys.
#[derive(Debug)]
pub(crate) struct Changes<K> {
    pub create: Vec<Node<K>>,
    pub update: Vec<Node<K>>,
    pub delete: Vec<(Level, K, K)>,
}

impl<K: Ord + Clone> Changes<K> {
    fn new() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }

    fn drop_node(&mut self, node: &Node<K>) {
        self.delete
            .push((node.level, node.k_min.clone(), node.k_max.clone()));
    }

    /// Encodes the changes into a store delta.
    pub fn into_delta<C>(self, codec: &C) -> Delta
    where
        C: KeyCodec<Key = K>,
    {
        Delta {
            create: self.create.iter().map(|n| n.to_row(codec)).collect(),
            update: self.update.iter().map(|n| n.to_row(codec)).collect(),
            delete: self
                .delete
                .iter()
                .map(|(level, k_min, k_max)| {
                    NodeId::new(*level, codec.encode(k_min), codec.encode(k_max))
                })
                .collect(),
        }
    }
}

/// Rewrites the value of an existing key.
///
/// `chain` holds the nodes with `k_min < key < k_max` in ascending level order; the
/// first one must store `key`.
pub(crate) fn plan_update<K, F>(
    agg: &F,
    mut chain: Vec<Node<K>>,
    key: &K,
    value: String,
) -> Result<Changes<K>>
where
    K: Ord + Clone,
    F: Aggregator,
{
    let holder = chain
        .first_mut()
        .ok_or_else(|| DbTreeError::invariant("no node spans the updated key"))?;
    if !holder.update_value(key, value) {
        return Err(DbTreeError::invariant("updated key is not stored"));
    }
    repair_ancestors(agg, &mut chain)?;
    let mut changes = Changes::new();
    changes.update = chain;
    Ok(changes)
}

/// Inserts a new pair on `level`.
///
/// `including` holds the nodes with `k_min < key < k_max` in ascending level order.
pub(crate) fn plan_insert<K, F>(
    agg: &F,
    including: Vec<Node<K>>,
    key: K,
    value: String,
    level: Level,
) -> Result<Changes<K>>
where
    K: Ord + Clone,
    F: Aggregator,
{
    if including.iter().any(|node| node.contains(&key)) {
        return Err(DbTreeError::invariant("inserted key is already stored"));
    }

    let mut upper = Vec::new();
    let mut lower = Vec::new();
    let mut same = None;
    for node in including {
        match node.level.cmp(&level) {
            std::cmp::Ordering::Greater => upper.push(node),
            std::cmp::Ordering::Less => lower.push(node),
            std::cmp::Ordering::Equal if same.is_none() => same = Some(node),
            std::cmp::Ordering::Equal => {
                return Err(DbTreeError::invariant(format!(
                    "two nodes on level {level} span the inserted key"
                )))
            }
        }
    }

    let (nbar, created) = match same {
        Some(mut node) => {
            node.insert_pair(key.clone(), value);
            (node, false)
        }
        None => {
            let parent = upper
                .first()
                .ok_or_else(|| DbTreeError::invariant("no node above the inserted level"))?;
            let (k_min, k_max) = parent.between(&key);
            let pair = Element::pair(key.clone(), value);
            (Node::new(level, k_min, k_max, vec![pair]), true)
        }
    };

    // Split every lower node at the new key.
    let mut lefts = Vec::new();
    let mut rights = Vec::new();
    for node in &lower {
        let left = node.lower_partition(&key);
        if !left.is_empty() {
            lefts.push(Node::new(node.level, node.k_min.clone(), key.clone(), left));
        }
        let right = node.higher_partition(&key);
        if !right.is_empty() {
            rights.push(Node::new(node.level, key.clone(), node.k_max.clone(), right));
        }
    }
    trace!(
        level,
        lefts = lefts.len(),
        rights = rights.len(),
        "dbtree.insert.split"
    );

    lefts.push(nbar);
    repair_ancestors(agg, &mut lefts)?;
    let nbar = pop_top(&mut lefts)?;

    rights.push(nbar);
    repair_ancestors(agg, &mut rights)?;
    let nbar = pop_top(&mut rights)?;

    upper.insert(0, nbar);
    repair_ancestors(agg, &mut upper)?;
    let nbar = upper.remove(0);

    let mut changes = Changes::new();
    for node in &lower {
        changes.drop_node(node);
    }
    changes.create.extend(lefts);
    changes.create.extend(rights);
    if created {
        changes.create.push(nbar);
    } else {
        changes.update.push(nbar);
    }
    changes.update.extend(upper);
    Ok(changes)
}

fn pop_top<K>(path: &mut Vec<Node<K>>) -> Result<Node<K>> {
    path.pop()
        .ok_or_else(|| DbTreeError::invariant("repair path lost its top node"))
}

/// Removes a stored key.
///
/// `delete_set` holds the nodes with `k_min <= key <= k_max` in ascending level order.
/// Lower-level nodes that end at `key` are merged with the ones that start there.
pub(crate) fn plan_delete<K, F>(
    agg: &F,
    delete_set: Vec<Node<K>>,
    key: &K,
) -> Result<Changes<K>>
where
    K: Ord + Clone,
    F: Aggregator,
{
    let position = delete_set
        .iter()
        .position(|node| node.contains(key))
        .ok_or_else(|| DbTreeError::invariant("deleted key is not stored"))?;
    let mut nodes = delete_set;
    let mut nbar = nodes.remove(position);
    let level = nbar.level;
    let slots = usize::try_from(level)
        .map_err(|_| DbTreeError::invariant(format!("stored key on level {level}")))?;

    let mut lefts: Vec<Option<Node<K>>> = vec![None; slots];
    let mut rights: Vec<Option<Node<K>>> = vec![None; slots];
    let mut upper = Vec::new();
    let mut changes = Changes::new();

    for node in nodes {
        if node.level > level {
            upper.push(node);
            continue;
        }
        let index = usize::try_from(node.level).ok().filter(|&i| i < slots);
        let side = match (index, &node.k_min < key, key < &node.k_max) {
            (Some(i), true, false) => &mut lefts[i],
            (Some(i), false, true) => &mut rights[i],
            _ => {
                return Err(DbTreeError::invariant(format!(
                    "unexpected node on level {} around the deleted key",
                    node.level
                )))
            }
        };
        if side.is_some() {
            return Err(DbTreeError::invariant(format!(
                "two nodes on level {} share a side of the deleted key",
                node.level
            )));
        }
        changes.drop_node(&node);
        *side = Some(node);
    }

    nbar.remove_pair_and_neighbor_aggregates(key);
    let keep_nbar = !nbar.is_empty();
    if !keep_nbar {
        let parent = upper
            .first_mut()
            .ok_or_else(|| DbTreeError::invariant("no node above the deleted level"))?;
        parent.remove_aggregate_between(&nbar.k_min, &nbar.k_max);
        changes.drop_node(&nbar);
    }

    // Merge the two sides level by level, top down.
    let mut bracket = nbar.between(key);
    let mut merged = Vec::new();
    for index in (0..slots).rev() {
        let node = match (lefts[index].take(), rights[index].take()) {
            (Some(left), Some(right)) => {
                let node_level = left.level;
                let mut context = left.into_context();
                if context.last().is_some_and(Element::is_aggregate) {
                    context.pop();
                }
                let mut right = right.into_context();
                if right.first().is_some_and(Element::is_aggregate) {
                    right.remove(0);
                }
                context.extend(right);
                let (k_min, k_max) = bracket.clone();
                Some(Node::new(node_level, k_min, k_max, context))
            }
            (Some(mut left), None) => {
                left.k_max = bracket.1.clone();
                Some(left)
            }
            (None, Some(mut right)) => {
                right.k_min = bracket.0.clone();
                Some(right)
            }
            (None, None) => None,
        };
        if let Some(node) = node {
            bracket = node.between(key);
            merged.push(node);
        }
    }
    trace!(level, merged = merged.len(), keep_nbar, "dbtree.delete.merge");

    merged.reverse();
    let created = merged.len();
    let mut path = merged;
    if keep_nbar {
        path.push(nbar);
    }
    path.extend(upper);
    repair_ancestors(agg, &mut path)?;

    changes.update = path.split_off(created);
    changes.create = path;
    Ok(changes)
}
