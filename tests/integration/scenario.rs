#![allow(missing_docs)]

use dbtree::aggregate::{Aggregator, SumCount};
use dbtree::codec::IntKeyCodec;
use dbtree::store::{MemoryStore, NodeStore};
use dbtree::tree::{DbTree, DbTreeOptions};
use dbtree::types::Result;
use tracing_subscriber::EnvFilter;

const KEYS: i32 = 10_000;
const TOTAL: i64 = 50_005_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type SumCountTree = DbTree<IntKeyCodec, SumCount, MemoryStore<IntKeyCodec>>;

fn open() -> Result<SumCountTree> {
    DbTree::open(SumCount, MemoryStore::new(IntKeyCodec), DbTreeOptions::default())
}

fn check_lifecycle(tree: &mut SumCountTree) -> Result<()> {
    assert_eq!(tree.range_query(&10, &1_000)?, (500_455, 991));
    assert_eq!(tree.range_query(&i32::MIN, &i32::MAX)?, (TOTAL, i64::from(KEYS)));

    tree.delete(&5_000)?;
    assert_eq!(
        tree.range_query(&i32::MIN, &i32::MAX)?,
        (TOTAL - 5_000, i64::from(KEYS) - 1)
    );
    assert_eq!(tree.range_query(&4_999, &5_001)?, (10_000, 2));

    tree.insert(5_000, &5_000)?;
    assert_eq!(tree.root_aggregate()?, (TOTAL, i64::from(KEYS)));
    assert_eq!(tree.range_query(&4_999, &5_001)?, (15_000, 3));
    Ok(())
}

#[test]
fn ten_thousand_sequential_inserts() -> Result<()> {
    init_tracing();
    let mut tree = open()?;
    for key in 1..=KEYS {
        tree.insert(key, &key)?;
    }
    check_lifecycle(&mut tree)
}

#[test]
fn ten_thousand_keys_batch_loaded() -> Result<()> {
    init_tracing();
    let mut tree = open()?;
    tree.insert_batch((1..=KEYS).rev().map(|k| (k, k)))?;
    check_lifecycle(&mut tree)
}

#[test]
fn raw_ranges_compose() -> Result<()> {
    let mut tree = open()?;
    tree.insert_batch((1..=KEYS).map(|k| (k, k)))?;
    let agg = tree.aggregator();
    let left = tree.range_query_raw(&10, &500)?;
    let right = tree.range_query_raw(&501, &1_000)?;
    assert_eq!(agg.combine(&[left, right]), tree.range_query_raw(&10, &1_000)?);
    Ok(())
}

#[test]
fn tree_shape_stays_logarithmic() -> Result<()> {
    let mut tree = open()?;
    tree.insert_batch((1..=KEYS).map(|k| (k, k)))?;
    let chain = tree.store().including_key(&7_777)?;
    // Levels are geometric with p = 1/2, so the path is a few dozen nodes at most.
    assert!(chain.len() <= 40, "path of {} nodes", chain.len());
    assert!(tree.store().node_count()? < KEYS as usize);
    Ok(())
}
