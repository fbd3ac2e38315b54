//! Proof-carrying point queries.
//!
//! A proof is the path from the node storing a key up to the child of the permanent
//! root, with every element replaced by its partial aggregate. In each entry exactly one
//! slot is left open: the queried pair in the first entry, the slot of the subtree just
//! verified in the others. Replaying the path with `f` reproduces the root aggregate, so
//! a client holding a trusted root hash can check a single value.

use serde::{Deserialize, Serialize};

use super::element::Element;
use super::node::{partial_of, Node};
use crate::aggregate::Aggregator;
use crate::types::{DbTreeError, Result};

/// One position of a proof entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofSlot<A> {
    /// Filled by the verifier with the running aggregate.
    Placeholder,
    /// A partial aggregate taken from the tree.
    Literal(A),
}

/// Ordered per-node entries, lowest node first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof<A> {
    entries: Vec<Vec<ProofSlot<A>>>,
}

/// A stored value together with the proof of its membership.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthenticatedValue<V, A> {
    /// Value stored under the queried key.
    pub value: V,
    /// Path proof for `value`.
    pub proof: Proof<A>,
}

impl<A: Clone> Proof<A> {
    /// Wraps raw entries.
    pub fn new(entries: Vec<Vec<ProofSlot<A>>>) -> Self {
        Self { entries }
    }

    /// Entries, lowest node first.
    pub fn entries(&self) -> &[Vec<ProofSlot<A>>] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the proof has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Root aggregate implied by `value`, before `h`.
    pub fn root_partial<F>(&self, agg: &F, value: &F::Value) -> Result<A>
    where
        F: Aggregator<Partial = A>,
    {
        let mut running = agg.lift(value);
        for (depth, entry) in self.entries.iter().enumerate() {
            let placeholders = entry
                .iter()
                .filter(|slot| matches!(slot, ProofSlot::Placeholder))
                .count();
            if placeholders != 1 {
                return Err(DbTreeError::invariant(format!(
                    "proof entry {depth} has {placeholders} open slots"
                )));
            }
            let parts: Vec<A> = entry
                .iter()
                .map(|slot| match slot {
                    ProofSlot::Placeholder => running.clone(),
                    ProofSlot::Literal(partial) => partial.clone(),
                })
                .collect();
            running = agg.combine(&parts);
        }
        Ok(running)
    }

    /// Replays the proof from `value` and finalizes the result with `h`.
    pub fn verify<F>(&self, agg: &F, value: &F::Value) -> Result<F::Output>
    where
        F: Aggregator<Partial = A>,
    {
        Ok(agg.finalize(&self.root_partial(agg, value)?))
    }
}

/// Builds the proof for `key` from the chain of nodes with `k_min < key < k_max`,
/// ascending level. The first node must store `key`; the last one is the root.
pub(crate) fn build_proof<K, F>(
    agg: &F,
    chain: &[Node<K>],
    key: &K,
) -> Result<AuthenticatedValue<F::Value, F::Partial>>
where
    K: Ord + Clone,
    F: Aggregator,
{
    let (holder, above) = chain
        .split_first()
        .ok_or_else(|| DbTreeError::invariant("no node spans the queried key"))?;
    let text = holder
        .pair_value(key)
        .ok_or_else(|| DbTreeError::invariant("queried key is not stored"))?;
    let value = agg.parse_value(text)?;

    let mut entries = Vec::with_capacity(chain.len());
    let first = holder
        .context()
        .iter()
        .map(|element| match element {
            Element::Pair { key: k, .. } if k == key => Ok(ProofSlot::Placeholder),
            other => partial_of(agg, other).map(ProofSlot::Literal),
        })
        .collect::<Result<Vec<_>>>()?;
    entries.push(first);

    let ancestors = match above.split_last() {
        Some((root, rest)) if root.is_top() => rest,
        _ => above,
    };
    for node in ancestors {
        let mut entry = Vec::with_capacity(node.len());
        let mut open = false;
        for (index, element) in node.context().iter().enumerate() {
            let on_path = !open && element.is_aggregate() && {
                let (lower, upper) = node.slot_bounds(index);
                lower < key && key < upper
            };
            if on_path {
                open = true;
                entry.push(ProofSlot::Placeholder);
            } else {
                entry.push(ProofSlot::Literal(partial_of(agg, element)?));
            }
        }
        if !open {
            return Err(DbTreeError::invariant(format!(
                "no slot on level {} leads to the queried key",
                node.level
            )));
        }
        entries.push(entry);
    }

    Ok(AuthenticatedValue {
        value,
        proof: Proof::new(entries),
    })
}
