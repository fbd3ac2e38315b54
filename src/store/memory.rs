use std::collections::{BTreeMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{assign_groups, Delta, GroupByStore, NodeStore, StoreError};
use crate::codec::{GroupKeyCodec, KeyCodec};
use crate::tree::NodeRow;
use crate::types::{Level, NodeId, Result, TOP_LEVEL};

/// Rows of one level keyed by their parsed lower bound. Nodes on one level never
/// overlap, so the lower bound is unique.
type LevelMap<K> = BTreeMap<K, Stored<K>>;

#[derive(Clone, Debug)]
struct Stored<K> {
    k_max: K,
    row: NodeRow,
}

#[derive(Debug)]
struct State<K> {
    aggregator: Option<String>,
    closed: bool,
    levels: BTreeMap<Level, LevelMap<K>>,
}

/// Volatile store keeping every level in an ordered map.
///
/// Readers share a `RwLock`; a delta is validated completely before the first row
/// changes, so a rejected delta leaves the store untouched.
pub struct MemoryStore<C: KeyCodec> {
    codec: C,
    state: RwLock<State<C::Key>>,
}

impl<C: KeyCodec> MemoryStore<C> {
    /// Creates an empty, unconnected store.
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            state: RwLock::new(State {
                aggregator: None,
                closed: false,
                levels: BTreeMap::new(),
            }),
        }
    }

    /// Every stored row, ascending by level then lower bound.
    pub fn rows(&self) -> Result<Vec<NodeRow>> {
        let state = self.read()?;
        Ok(state
            .levels
            .values()
            .flat_map(|level| level.values().map(|stored| stored.row.clone()))
            .collect())
    }

    fn read(&self) -> Result<parking_lot::RwLockReadGuard<'_, State<C::Key>>> {
        let state = self.state.read();
        if state.closed {
            return Err(StoreError::Closed.into());
        }
        if state.aggregator.is_none() {
            return Err(StoreError::NotConnected.into());
        }
        Ok(state)
    }

    /// Collects, level by level, the rows picked by `select` from that level's map.
    fn per_level<F>(&self, mut select: F) -> Result<Vec<NodeRow>>
    where
        F: FnMut(&LevelMap<C::Key>) -> Vec<NodeRow>,
    {
        let state = self.read()?;
        Ok(state.levels.values().flat_map(|level| select(level)).collect())
    }

    fn scan<F>(&self, mut keep: F) -> Result<Vec<NodeRow>>
    where
        F: FnMut(&C::Key, &C::Key) -> bool,
    {
        self.per_level(|level| {
            level
                .iter()
                .filter(|(k_min, stored)| keep(k_min, &stored.k_max))
                .map(|(_, stored)| stored.row.clone())
                .collect()
        })
    }

    fn parse_id(&self, id: &NodeId) -> Result<(Level, C::Key, C::Key)> {
        Ok((
            id.level,
            self.codec.parse(&id.k_min)?,
            self.codec.parse(&id.k_max)?,
        ))
    }
}

fn last_below<'a, K: Ord>(level: &'a LevelMap<K>, key: &K) -> Option<(&'a K, &'a Stored<K>)> {
    level.range(..key).next_back()
}

fn holds<K: Ord>(state: &State<K>, level: Level, k_min: &K, id: &NodeId) -> bool {
    state
        .levels
        .get(&level)
        .and_then(|map| map.get(k_min))
        .is_some_and(|stored| stored.row.k_min == id.k_min && stored.row.k_max == id.k_max)
}

impl<C: KeyCodec> NodeStore<C> for MemoryStore<C> {
    fn codec(&self) -> &C {
        &self.codec
    }

    fn connect(&self, aggregator: &str, top_level: Level, identity_context: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed.into());
        }
        state.aggregator = Some(aggregator.to_owned());
        let min = self.codec.min_key();
        let has_root = state
            .levels
            .get(&top_level)
            .is_some_and(|level| level.contains_key(&min));
        if !has_root {
            let row = NodeRow::new(
                top_level,
                self.codec.encode(&min),
                self.codec.encode(&self.codec.max_key()),
                identity_context,
            );
            state.levels.entry(top_level).or_default().insert(
                min,
                Stored {
                    k_max: self.codec.max_key(),
                    row,
                },
            );
            debug!(aggregator, "store.memory.root_created");
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        state.closed = true;
        state.levels.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    fn root(&self) -> Result<NodeRow> {
        let state = self.read()?;
        let min = self.codec.min_key();
        state
            .levels
            .get(&TOP_LEVEL)
            .and_then(|level| level.get(&min))
            .map(|stored| stored.row.clone())
            .ok_or_else(|| {
                StoreError::MissingNode(NodeId::new(
                    TOP_LEVEL,
                    self.codec.encode(&min),
                    self.codec.encode(&self.codec.max_key()),
                ))
                .into()
            })
    }

    fn including_key(&self, key: &C::Key) -> Result<Vec<NodeRow>> {
        self.per_level(|level| {
            last_below(level, key)
                .filter(|(_, stored)| key < &stored.k_max)
                .map(|(_, stored)| stored.row.clone())
                .into_iter()
                .collect()
        })
    }

    fn delete_set(&self, key: &C::Key) -> Result<Vec<NodeRow>> {
        self.per_level(|level| {
            let mut rows: Vec<_> = level
                .range(..=key)
                .rev()
                .take(2)
                .filter(|(_, stored)| key <= &stored.k_max)
                .map(|(_, stored)| stored.row.clone())
                .collect();
            rows.reverse();
            rows
        })
    }

    fn range_nbar(&self, k1: &C::Key, k2: &C::Key) -> Result<Option<NodeRow>> {
        let rows = self.per_level(|level| {
            last_below(level, k1)
                .filter(|(_, stored)| k2 < &stored.k_max)
                .map(|(_, stored)| stored.row.clone())
                .into_iter()
                .collect()
        })?;
        Ok(rows.into_iter().next())
    }

    fn range_left(&self, k1: &C::Key, k2: &C::Key) -> Result<Vec<NodeRow>> {
        self.per_level(|level| {
            last_below(level, k1)
                .filter(|(_, stored)| k1 < &stored.k_max && &stored.k_max <= k2)
                .map(|(_, stored)| stored.row.clone())
                .into_iter()
                .collect()
        })
    }

    fn range_right(&self, k1: &C::Key, k2: &C::Key) -> Result<Vec<NodeRow>> {
        self.per_level(|level| {
            last_below(level, k2)
                .filter(|(k_min, stored)| k1 <= *k_min && k2 < &stored.k_max)
                .map(|(_, stored)| stored.row.clone())
                .into_iter()
                .collect()
        })
    }

    fn node_count(&self) -> Result<usize> {
        let state = self.read()?;
        Ok(state.levels.values().map(BTreeMap::len).sum())
    }

    fn apply_delta(&self, delta: &Delta) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed.into());
        }

        let deletes = delta
            .delete
            .iter()
            .map(|id| self.parse_id(id))
            .collect::<Result<Vec<_>>>()?;
        let creates = delta
            .create
            .iter()
            .map(|row| self.parse_id(&row.id()))
            .collect::<Result<Vec<_>>>()?;

        let mut removed = HashSet::new();
        for ((level, k_min, _), id) in deletes.iter().zip(&delta.delete) {
            if !holds(&state, *level, k_min, id) || !removed.insert(id.clone()) {
                return Err(StoreError::MissingNode(id.clone()).into());
            }
        }
        let mut added = HashSet::new();
        for ((level, k_min, _), row) in creates.iter().zip(&delta.create) {
            let id = row.id();
            let occupied = state
                .levels
                .get(level)
                .and_then(|map| map.get(k_min))
                .is_some_and(|stored| !removed.contains(&stored.row.id()));
            if occupied || !added.insert(id.clone()) {
                return Err(StoreError::DuplicateNode(id).into());
            }
        }
        let mut updates = Vec::with_capacity(delta.update.len());
        for row in &delta.update {
            let id = row.id();
            let (level, k_min, _) = self.parse_id(&id)?;
            let live = holds(&state, level, &k_min, &id) && !removed.contains(&id);
            if !live && !added.contains(&id) {
                return Err(StoreError::MissingNode(id).into());
            }
            updates.push((level, k_min, row));
        }

        for (level, k_min, _) in deletes {
            let emptied = match state.levels.get_mut(&level) {
                Some(map) => {
                    map.remove(&k_min);
                    map.is_empty()
                }
                None => false,
            };
            if emptied {
                state.levels.remove(&level);
            }
        }
        for ((level, k_min, k_max), row) in creates.into_iter().zip(&delta.create) {
            state.levels.entry(level).or_default().insert(
                k_min,
                Stored {
                    k_max,
                    row: row.clone(),
                },
            );
        }
        for (level, k_min, row) in updates {
            let stored = state
                .levels
                .get_mut(&level)
                .and_then(|map| map.get_mut(&k_min));
            if let Some(stored) = stored {
                stored.row.context.clone_from(&row.context);
            }
        }
        trace!(
            created = delta.create.len(),
            updated = delta.update.len(),
            deleted = delta.delete.len(),
            "store.memory.apply_delta"
        );
        Ok(())
    }
}

impl<C: GroupKeyCodec> GroupByStore<C> for MemoryStore<C> {
    fn group_by_left(&self, y1: &C::Part, y2: &C::Part) -> Result<Vec<NodeRow>> {
        let codec = &self.codec;
        self.scan(|k_min, k_max| {
            let upper = codec.least_significant(k_max);
            let split = codec.group(k_min) != codec.group(k_max);
            y1 < &upper && &upper <= y2 && (&codec.least_significant(k_min) < y1 || split)
        })
    }

    fn group_by_right(&self, y1: &C::Part, y2: &C::Part) -> Result<Vec<NodeRow>> {
        let codec = &self.codec;
        self.scan(|k_min, k_max| {
            let lower = codec.least_significant(k_min);
            let split = codec.group(k_min) != codec.group(k_max);
            y1 <= &lower && &lower < y2 && (&codec.least_significant(k_max) > y2 || split)
        })
    }

    fn group_by_nbar(
        &self,
        y1: &C::Part,
        y2: &C::Part,
    ) -> Result<BTreeMap<C::Group, Option<NodeRow>>> {
        let codec = &self.codec;
        let candidates = self.scan(|k_min, k_max| {
            let spans = &codec.least_significant(k_min) < y1 && &codec.least_significant(k_max) > y2;
            spans || codec.group(k_min) != codec.group(k_max)
        })?;
        assign_groups(codec, candidates, y1, y2)
    }
}
