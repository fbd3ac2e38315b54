//! Persistence boundary.
//!
//! Stores keep nodes as [`NodeRow`]s and answer the handful of interval predicates the
//! tree algorithms need. Every mutation reaches the store as one [`Delta`] that must be
//! applied atomically.

use std::collections::BTreeMap;

use crate::codec::{GroupKeyCodec, KeyCodec};
use crate::tree::{Node, NodeRow};
use crate::types::{Level, NodeId, Result};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SqliteStoreOptions};


/// Failures raised at the persistence boundary.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// SQLite reported an error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// A created node already exists.
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),
    /// An updated or deleted node does not exist.
    #[error("node {0} does not exist")]
    MissingNode(NodeId),
    /// The store was used before `connect`.
    #[error("store is not connected")]
    NotConnected,
    /// The store was used after `close`.
    #[error("store is closed")]
    Closed,
}

/// Node changes produced by one tree operation.
///
/// Stores apply deletes first, then creates, then updates, all in one unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    /// Rows to insert.
    pub create: Vec<NodeRow>,
    /// Rows whose context is rewritten.
    pub update: Vec<NodeRow>,
    /// Identities of rows to drop.
    pub delete: Vec<NodeId>,
}

impl Delta {
    /// Returns true if the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Retrieval and mutation contract of a node store.
///
/// All multi-row reads return rows in ascending level order.
pub trait NodeStore<C: KeyCodec>: Send + Sync {
    /// Codec used to interpret keys.
    fn codec(&self) -> &C;

    /// Prepares storage for one aggregation function and makes sure the permanent root
    /// exists, seeding it with `identity_context` if it does not.
    fn connect(&self, aggregator: &str, top_level: Level, identity_context: &str) -> Result<()>;

    /// Releases the underlying resources. Later calls fail with [`StoreError::Closed`].
    fn close(&self) -> Result<()>;

    /// Returns true once `close` has been called.
    fn is_closed(&self) -> bool;

    /// The permanent root.
    fn root(&self) -> Result<NodeRow>;

    /// Nodes with `k_min < key < k_max`.
    fn including_key(&self, key: &C::Key) -> Result<Vec<NodeRow>>;

    /// Nodes with `k_min <= key <= k_max`.
    fn delete_set(&self, key: &C::Key) -> Result<Vec<NodeRow>>;

    /// Lowest node with `k_min < k1` and `k2 < k_max`.
    fn range_nbar(&self, k1: &C::Key, k2: &C::Key) -> Result<Option<NodeRow>>;

    /// Nodes with `k_min < k1 < k_max <= k2`.
    fn range_left(&self, k1: &C::Key, k2: &C::Key) -> Result<Vec<NodeRow>>;

    /// Nodes with `k1 <= k_min < k2 < k_max`.
    fn range_right(&self, k1: &C::Key, k2: &C::Key) -> Result<Vec<NodeRow>>;

    /// Number of stored rows, root included.
    fn node_count(&self) -> Result<usize>;

    /// Applies `delta` atomically: either every change lands or none does.
    fn apply_delta(&self, delta: &Delta) -> Result<()>;

    /// Inserts one row.
    fn create(&self, row: NodeRow) -> Result<()> {
        self.create_all(vec![row])
    }

    /// Inserts several rows.
    fn create_all(&self, rows: Vec<NodeRow>) -> Result<()> {
        self.apply_delta(&Delta {
            create: rows,
            ..Delta::default()
        })
    }

    /// Rewrites one row's context.
    fn update(&self, row: NodeRow) -> Result<()> {
        self.update_all(vec![row])
    }

    /// Rewrites several rows' contexts.
    fn update_all(&self, rows: Vec<NodeRow>) -> Result<()> {
        self.apply_delta(&Delta {
            update: rows,
            ..Delta::default()
        })
    }

    /// Drops one row.
    fn delete(&self, id: NodeId) -> Result<()> {
        self.delete_all(vec![id])
    }

    /// Drops several rows.
    fn delete_all(&self, ids: Vec<NodeId>) -> Result<()> {
        self.apply_delta(&Delta {
            delete: ids,
            ..Delta::default()
        })
    }
}

/// Group-by retrieval, available for composite keys only.
///
/// `y1` and `y2` are least significant parts; the predicates return supersets of the
/// per-group `L` / `R` sets, which the tree narrows down per group.
pub trait GroupByStore<C: GroupKeyCodec>: NodeStore<C> {
    /// Nodes with `y1 < lsp(k_max) <= y2` and either `lsp(k_min) < y1` or differing
    /// groups at the two bounds.
    fn group_by_left(&self, y1: &C::Part, y2: &C::Part) -> Result<Vec<NodeRow>>;

    /// Nodes with `y1 <= lsp(k_min) < y2` and either `lsp(k_max) > y2` or differing
    /// groups at the two bounds.
    fn group_by_right(&self, y1: &C::Part, y2: &C::Part) -> Result<Vec<NodeRow>>;

    /// The lowest node spanning `[bind(g, y1), bind(g, y2)]` for every group `g`
    /// stored in the tree, or `None` when one of those bounds is a domain sentinel.
    fn group_by_nbar(
        &self,
        y1: &C::Part,
        y2: &C::Part,
    ) -> Result<BTreeMap<C::Group, Option<NodeRow>>>;
}

/// Assigns every group found among the pairs of `candidates` (ascending level) to the
/// first candidate spanning that group's range.
pub(crate) fn assign_groups<C: GroupKeyCodec>(
    codec: &C,
    candidates: Vec<NodeRow>,
    y1: &C::Part,
    y2: &C::Part,
) -> Result<BTreeMap<C::Group, Option<NodeRow>>> {
    let nodes = candidates
        .iter()
        .map(|row| Node::from_row(row, codec))
        .collect::<Result<Vec<_>>>()?;

    let mut groups: Vec<C::Group> = nodes
        .iter()
        .flat_map(|node| node.pair_keys().map(|key| codec.group(key)))
        .collect();
    groups.sort();
    groups.dedup();

    let (min, max) = (codec.min_key(), codec.max_key());
    let mut assigned = BTreeMap::new();
    for group in groups {
        let k1 = codec.bind(&group, y1);
        let k2 = codec.bind(&group, y2);
        // A bound on a sentinel leaves the group to its L or R nodes alone.
        if k1 <= min || k2 >= max {
            assigned.insert(group, None);
            continue;
        }
        if let Some(index) = nodes
            .iter()
            .position(|node| node.k_min < k1 && k2 < node.k_max)
        {
            assigned.insert(group, Some(candidates[index].clone()));
        }
    }
    Ok(assigned)
}
