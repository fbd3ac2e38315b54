#![allow(missing_docs)]

use std::error::Error;

use dbtree::aggregate::{Average, SumCount};
use dbtree::codec::{IntKeyCodec, PairKey, PairKeyCodec};
use dbtree::store::{SqliteStore, SqliteStoreOptions};
use dbtree::tree::{DbTree, DbTreeOptions};
use dbtree::Config;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

type TestResult = std::result::Result<(), Box<dyn Error>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn configured_file_store_persists_across_reopen() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let config_path = dir.path().join("dbtree.toml");
    let db_path = dir.path().join("nodes.db");
    std::fs::write(
        &config_path,
        format!(
            "[tree]\nparallel_fetch = true\ngroup_by_threads = 2\n\n\
             [sqlite]\npath = {:?}\ntable_base_name = \"scenario\"\nsynchronous = \"FULL\"\n",
            db_path.display().to_string()
        ),
    )?;
    let config = Config::load(&config_path)?;
    assert_eq!(config.sqlite.path.as_deref(), Some(db_path.as_path()));

    let mut keys: Vec<i32> = (1..=1_000).collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0xdb7));
    {
        let store = SqliteStore::open(IntKeyCodec, &config.sqlite)?;
        let mut tree = DbTree::open(SumCount, store, config.tree.clone())?;
        for key in &keys {
            tree.insert(*key, key)?;
        }
        tree.delete(&500)?;
        tree.update(&501, &0)?;
        assert_eq!(tree.range_query(&10, &1_000)?, (500_455 - 500 - 501, 990));
        assert_eq!(
            tree.store().table_name().as_deref(),
            Some("scenario_sumcount_int")
        );
        tree.close()?;
        assert!(tree.is_closed());
    }

    let store = SqliteStore::open(IntKeyCodec, &config.sqlite)?;
    let mut tree = DbTree::open(SumCount, store, config.tree)?;
    assert_eq!(tree.root_aggregate()?, (500_500 - 500 - 501, 999));
    tree.insert(500, &500)?;
    tree.update(&501, &501)?;
    assert_eq!(tree.root_aggregate()?, (500_500, 1_000));
    Ok(())
}

#[test]
fn aggregators_keep_separate_tables() -> TestResult {
    let dir = tempdir()?;
    let options = SqliteStoreOptions::at(dir.path().join("shared.db"));

    let mut sums = DbTree::open(
        SumCount,
        SqliteStore::open(IntKeyCodec, &options)?,
        DbTreeOptions::default(),
    )?;
    let mut averages = DbTree::open(
        Average,
        SqliteStore::open(IntKeyCodec, &options)?,
        DbTreeOptions::default(),
    )?;
    for key in 1..=50 {
        sums.insert(key, &(key * 2))?;
        averages.insert(key, &(key * 2))?;
    }
    assert_eq!(sums.range_query(&1, &10)?, (110, 10));
    assert_eq!(averages.range_query(&1, &10)?, 11);
    assert_ne!(sums.store().table_name(), averages.store().table_name());
    Ok(())
}

#[test]
fn batch_load_into_sqlite() -> TestResult {
    let store = SqliteStore::in_memory(IntKeyCodec)?;
    let mut tree = DbTree::open(SumCount, store, DbTreeOptions::default())?;
    let mut pairs: Vec<(i32, i32)> = (1..=2_000).map(|k| (k, k % 7)).collect();
    pairs.shuffle(&mut ChaCha8Rng::seed_from_u64(12));
    tree.insert_batch(pairs)?;

    let expected: i64 = (100..=1_500).map(|k| i64::from(k % 7)).sum();
    assert_eq!(tree.range_query(&100, &1_500)?, (expected, 1_401));
    tree.delete(&700)?;
    assert_eq!(tree.range_query(&700, &700)?, (0, 0));
    assert!(tree.insert_batch(vec![(5_000, 1)]).is_err());
    Ok(())
}

#[test]
fn group_by_over_sqlite() -> TestResult {
    let store = SqliteStore::in_memory(PairKeyCodec)?;
    let options = DbTreeOptions::default().group_by_threads(4);
    let mut tree = DbTree::open(SumCount, store, options)?;
    let mut keys: Vec<PairKey> = (0..6)
        .flat_map(|x| (0..50).map(move |y| PairKey::new(x, y)))
        .collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(77));
    tree.insert_batch(keys.into_iter().map(|k| (k, k.y)))?;

    let groups = tree.group_by(&10, &19)?;
    let expected: Vec<(i32, (i64, i64))> = (0..6).map(|x| (x, (145, 10))).collect();
    assert_eq!(groups, expected);

    tree.delete(&PairKey::new(3, 15))?;
    let groups = tree.group_by(&10, &19)?;
    assert_eq!(groups[3], (3, (130, 9)));
    assert_eq!(groups[2], (2, (145, 10)));
    Ok(())
}
