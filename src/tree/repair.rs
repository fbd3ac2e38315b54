use tracing::trace;

use super::node::Node;
use crate::aggregate::Aggregator;
use crate::types::{DbTreeError, Result};

/// Ascending-path aggregate repair.
///
/// `path[0]` is the node that was just modified and `path[1..]` its ancestors in
/// ascending level order. Every ancestor gets the slot that covers `path[0]`'s key
/// range rewritten with the local aggregate of the node right below it.
pub(crate) fn repair_ancestors<K, F>(agg: &F, path: &mut [Node<K>]) -> Result<()>
where
    K: Ord + Clone,
    F: Aggregator,
{
    let Some((modified, ancestors)) = path.split_first_mut() else {
        return Ok(());
    };

    if modified.is_top() {
        // Everything below the root is gone.
        modified.set_first_aggregate(agg.encode_partial(&agg.identity()));
        return Ok(());
    }

    let mut partial = modified.local_aggregate(agg)?;
    let key = modified
        .first_key()
        .cloned()
        .ok_or_else(|| DbTreeError::invariant("repaired node holds no pair"))?;

    for node in ancestors.iter_mut() {
        let text = agg.encode_partial(&partial);
        if node.is_top() {
            node.set_first_aggregate(text);
        } else {
            let (first, last) = match (node.first_key(), node.last_key()) {
                (Some(first), Some(last)) => (first.clone(), last.clone()),
                _ => return Err(DbTreeError::invariant("ancestor node holds no pair")),
            };
            if key < first {
                node.set_first_aggregate(text);
            } else if key > last {
                node.set_last_aggregate(text);
            } else {
                node.set_interior_aggregate(&key, text)?;
            }
        }
        trace!(level = node.level, "dbtree.repair.slot");
        partial = node.local_aggregate(agg)?;
    }
    Ok(())
}
