//! The DB-tree: a skip-list-shaped search structure whose nodes cache partial aggregates
//! of everything below them.
//!
//! Every key is assigned a level by hashing its text. A node on level `l` holds the
//! level-`l` pairs between two keys of higher level, interleaved with aggregates that
//! summarize the lower-level content between consecutive pairs. The permanent root on
//! [`TOP_LEVEL`] holds a single aggregate over the whole tree.
//!
//! [`DbTree`] drives the algorithms; nodes live in a [`NodeStore`], and every mutation
//! reaches the store as one atomic [`Delta`](crate::store::Delta).

use std::collections::BTreeSet;
use std::marker::PhantomData;

use tracing::{debug, trace};

use crate::aggregate::Aggregator;
use crate::codec::{GroupKeyCodec, KeyCodec};
use crate::primitives::concurrency::FetchPool;
use crate::store::{Delta, GroupByStore, NodeStore};
use crate::types::{DbTreeError, Result, TOP_LEVEL};

mod batch;
mod element;
mod level;
mod mutation;
mod node;
mod options;
mod proof;
mod query;
mod repair;
mod row;

#[cfg(test)]
mod tests;

pub use element::Element;
pub use level::extract_level;
pub use node::{Node, NodeCursor};
pub use options::DbTreeOptions;
pub use proof::{AuthenticatedValue, Proof, ProofSlot};
pub use row::{NodeRow, CONTEXT_SEPARATOR};

use batch::BatchNode;
use element::{check_key_text, check_value_text};
use mutation::{plan_delete, plan_insert, plan_update, Changes};
use query::{fold_range, RangeNodes};

/// Authenticated, aggregation-aware search tree over a [`NodeStore`].
///
/// Mutations take `&mut self`, so a tree has a single writer; queries take `&self`
/// and may run from several threads.
pub struct DbTree<C, F, S>
where
    C: KeyCodec,
    F: Aggregator,
    S: NodeStore<C>,
{
    aggregator: F,
    store: S,
    options: DbTreeOptions,
    fetch: FetchPool,
    group_fetch: FetchPool,
    _codec: PhantomData<fn() -> C>,
}

impl<C, F, S> DbTree<C, F, S>
where
    C: KeyCodec,
    F: Aggregator,
    S: NodeStore<C>,
{
    /// Connects `store` for `aggregator`, creating the permanent root if the store is
    /// empty.
    pub fn open(aggregator: F, store: S, options: DbTreeOptions) -> Result<Self> {
        let identity = aggregator.encode_partial(&aggregator.identity());
        let root = Element::<String>::aggregate(identity);
        let identity_context = NodeRow::join_context([root.encode()]);
        store.connect(aggregator.name(), TOP_LEVEL, &identity_context)?;
        debug!(
            aggregator = aggregator.name(),
            codec = store.codec().name(),
            parallel = options.parallel_fetch,
            "dbtree.open"
        );
        Ok(Self {
            fetch: FetchPool::new(options.parallel_fetch, 0),
            group_fetch: FetchPool::new(options.parallel_fetch, options.group_by_threads),
            aggregator,
            store,
            options,
            _codec: PhantomData,
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The aggregation function.
    pub fn aggregator(&self) -> &F {
        &self.aggregator
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &DbTreeOptions {
        &self.options
    }

    fn codec(&self) -> &C {
        self.store.codec()
    }

    fn decode(&self, rows: Vec<NodeRow>) -> Result<Vec<Node<C::Key>>> {
        rows.iter()
            .map(|row| Node::from_row(row, self.codec()))
            .collect()
    }

    /// Encodes a key for storage, rejecting sentinels and unframeable text.
    fn key_text(&self, key: &C::Key) -> Result<String> {
        let codec = self.codec();
        if *key <= codec.min_key() || *key >= codec.max_key() {
            return Err(DbTreeError::invariant(format!(
                "key {key:?} is outside the storable domain"
            )));
        }
        let text = codec.encode(key);
        if self.options.validate_text {
            check_key_text(&text)?;
        }
        Ok(text)
    }

    fn value_text(&self, value: &F::Value) -> Result<String> {
        let text = self.aggregator.encode_value(value);
        if self.options.validate_text {
            check_value_text(&text)?;
        }
        Ok(text)
    }

    fn submit(&self, changes: Changes<C::Key>, event: &'static str) -> Result<()> {
        let delta = changes.into_delta(self.codec());
        debug!(
            op = event,
            created = delta.create.len(),
            updated = delta.update.len(),
            deleted = delta.delete.len(),
            "dbtree.delta"
        );
        self.store.apply_delta(&delta)
    }

    /// Inserts a new key. Fails if the key is already stored.
    pub fn insert(&mut self, key: C::Key, value: &F::Value) -> Result<()> {
        let key_text = self.key_text(&key)?;
        let value_text = self.value_text(value)?;
        let level = extract_level(&key_text);
        let including = self.decode(self.store.including_key(&key)?)?;
        trace!(key = %key_text, level, fetched = including.len(), "dbtree.insert");
        let changes = plan_insert(&self.aggregator, including, key, value_text, level)?;
        self.submit(changes, "insert")
    }

    /// Replaces the value of a stored key.
    pub fn update(&mut self, key: &C::Key, value: &F::Value) -> Result<()> {
        let key_text = self.key_text(key)?;
        let value_text = self.value_text(value)?;
        let chain = self.decode(self.store.including_key(key)?)?;
        trace!(key = %key_text, fetched = chain.len(), "dbtree.update");
        let changes = plan_update(&self.aggregator, chain, key, value_text)?;
        self.submit(changes, "update")
    }

    /// Removes a stored key.
    pub fn delete(&mut self, key: &C::Key) -> Result<()> {
        let key_text = self.key_text(key)?;
        let delete_set = self.decode(self.store.delete_set(key)?)?;
        trace!(key = %key_text, fetched = delete_set.len(), "dbtree.delete");
        let changes = plan_delete(&self.aggregator, delete_set, key)?;
        self.submit(changes, "delete")
    }

    /// Builds the whole tree from `pairs` in memory and writes it in one delta.
    ///
    /// The tree must be empty. Pairs may come in any order; duplicate keys are
    /// rejected. An empty batch changes nothing.
    pub fn insert_batch<I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (C::Key, F::Value)>,
    {
        let pairs: Vec<_> = pairs.into_iter().collect();
        if pairs.is_empty() {
            return Ok(());
        }
        let stored = self.store.node_count()?;
        if stored != 1 {
            return Err(DbTreeError::invariant(format!(
                "batch load needs an empty tree, found {stored} nodes"
            )));
        }

        let codec = self.codec();
        let mut seen = BTreeSet::new();
        let mut root = BatchNode::new(TOP_LEVEL, codec.min_key(), codec.max_key());
        for (key, value) in pairs {
            let key_text = self.key_text(&key)?;
            let value_text = self.value_text(&value)?;
            if !seen.insert(key.clone()) {
                return Err(DbTreeError::invariant(format!(
                    "key {key_text} appears twice in the batch"
                )));
            }
            root.insert(key, value_text, extract_level(&key_text));
        }

        let mut nodes = Vec::new();
        root.flatten(&self.aggregator, &mut nodes)?;
        let delta = Delta {
            create: nodes.iter().map(|node| node.to_row(codec)).collect(),
            update: Vec::new(),
            delete: vec![self.store.root()?.id()],
        };
        debug!(keys = seen.len(), created = delta.create.len(), "dbtree.insert_batch");
        self.store.apply_delta(&delta)
    }

    /// Aggregate over every stored pair, before `h`.
    pub fn root_aggregate_raw(&self) -> Result<F::Partial> {
        let root = Node::from_row(&self.store.root()?, self.codec())?;
        match root.context() {
            [Element::Aggregate(text)] => self.aggregator.parse_partial(text),
            _ => Err(DbTreeError::invariant(
                "root must hold exactly one aggregate",
            )),
        }
    }

    /// Aggregate over every stored pair.
    pub fn root_aggregate(&self) -> Result<F::Output> {
        Ok(self.aggregator.finalize(&self.root_aggregate_raw()?))
    }

    /// Aggregate over the keys in `[k1, k2]`, before `h`.
    pub fn range_query_raw(&self, k1: &C::Key, k2: &C::Key) -> Result<F::Partial> {
        if k1 > k2 {
            return Err(DbTreeError::invariant(format!(
                "range bounds are inverted: {k1:?} > {k2:?}"
            )));
        }
        let codec = self.codec();
        let (min, max) = (codec.min_key(), codec.max_key());
        let open_low = *k1 <= min;
        let open_high = *k2 >= max;
        if open_low && open_high {
            return self.root_aggregate_raw();
        }

        let store = &self.store;
        let (left, right, nbar) = self.fetch.join3(
            || store.range_left(k1, k2),
            || store.range_right(k1, k2),
            || store.range_nbar(k1, k2),
        );
        let left = self.decode(left?)?;
        let right = self.decode(right?)?;
        let nbar = match nbar? {
            Some(row) => Some(Node::from_row(&row, codec)?),
            None if open_low || open_high => None,
            None => {
                return Err(DbTreeError::invariant(format!(
                    "no node spans the range [{}, {}]",
                    codec.encode(k1),
                    codec.encode(k2)
                )))
            }
        };
        trace!(
            left = left.len(),
            right = right.len(),
            nbar = nbar.as_ref().map(|n| n.level),
            "dbtree.range.fetched"
        );
        fold_range(&self.aggregator, &RangeNodes { left, right, nbar }, k1, k2)
    }

    /// Aggregate over the keys in `[k1, k2]`.
    pub fn range_query(&self, k1: &C::Key, k2: &C::Key) -> Result<F::Output> {
        Ok(self.aggregator.finalize(&self.range_query_raw(k1, k2)?))
    }

    /// Value stored under `key` together with its membership proof.
    pub fn authenticated_query(
        &self,
        key: &C::Key,
    ) -> Result<AuthenticatedValue<F::Value, F::Partial>> {
        let chain = self.decode(self.store.including_key(key)?)?;
        proof::build_proof(&self.aggregator, &chain, key)
    }

    /// Releases the store.
    pub fn close(&mut self) -> Result<()> {
        debug!("dbtree.close");
        self.store.close()
    }

    /// Returns true once the store has been released.
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }
}

impl<C, F, S> DbTree<C, F, S>
where
    C: GroupKeyCodec,
    F: Aggregator,
    S: GroupByStore<C>,
{
    /// For every group `g`, the aggregate over the keys `bind(g, y1) ..= bind(g, y2)`,
    /// sorted by group.
    ///
    /// Groups are discovered among the pairs of the nodes spanning each group range,
    /// so a group may be reported with the aggregate of the empty set when its keys
    /// lie outside `[y1, y2]`.
    pub fn group_by(&self, y1: &C::Part, y2: &C::Part) -> Result<Vec<(C::Group, F::Output)>> {
        if y1 > y2 {
            return Err(DbTreeError::invariant(format!(
                "group range bounds are inverted: {y1:?} > {y2:?}"
            )));
        }
        let store = &self.store;
        let (left, right, spans) = self.fetch.join3(
            || store.group_by_left(y1, y2),
            || store.group_by_right(y1, y2),
            || store.group_by_nbar(y1, y2),
        );
        let left = self.decode(left?)?;
        let right = self.decode(right?)?;
        let spans: Vec<_> = spans?.into_iter().collect();
        trace!(
            left = left.len(),
            right = right.len(),
            groups = spans.len(),
            "dbtree.group_by.fetched"
        );

        let codec = self.codec();
        let aggregator = &self.aggregator;
        let (left, right) = (&left, &right);
        let results = self.group_fetch.map(spans, |(group, row)| {
            let nbar = row.map(|row| Node::from_row(&row, codec)).transpose()?;
            let k1 = codec.bind(&group, y1);
            let k2 = codec.bind(&group, y2);
            let nodes = RangeNodes::restricted_to(left, right, nbar, &k1, &k2);
            let partial = fold_range(aggregator, &nodes, &k1, &k2)?;
            Ok((group, aggregator.finalize(&partial)))
        });
        let mut results = results.into_iter().collect::<Result<Vec<_>>>()?;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }
}

impl<C, F, S> std::fmt::Debug for DbTree<C, F, S>
where
    C: KeyCodec,
    F: Aggregator,
    S: NodeStore<C>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTree")
            .field("aggregator", &self.aggregator.name())
            .field("codec", &self.codec().name())
            .field("options", &self.options)
            .field("fetch", &self.fetch)
            .finish()
    }
}
