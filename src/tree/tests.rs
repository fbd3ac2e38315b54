use std::collections::BTreeMap;
use std::ops::Bound;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::*;
use crate::aggregate::{Average, Count, HashChain, MaxInt, MinInt, Sum, SumCount};
use crate::codec::{IntKeyCodec, PairKey, PairKeyCodec};
use crate::store::MemoryStore;

type SumTree = DbTree<IntKeyCodec, Sum, MemoryStore<IntKeyCodec>>;

fn sum_tree() -> Result<SumTree> {
    DbTree::open(Sum, MemoryStore::new(IntKeyCodec), DbTreeOptions::sequential())
}

fn shuffled(keys: impl IntoIterator<Item = i32>, seed: u64) -> Vec<i32> {
    let mut keys: Vec<i32> = keys.into_iter().collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    keys
}

fn model_sum(model: &BTreeMap<i32, i32>, lower: Bound<i32>, upper: Bound<i32>) -> i64 {
    model.range((lower, upper)).map(|(_, v)| i64::from(*v)).sum()
}

/// Checks every stored node against `model`: ordering and alternation, pair values,
/// and that each gap carries an aggregate equal to the sum of the keys inside it
/// (or nothing when the gap is empty).
fn assert_consistent(tree: &SumTree, model: &BTreeMap<i32, i32>) -> Result<()> {
    let rows = tree.store().rows()?;
    let mut pairs = 0;
    for row in &rows {
        let node = Node::from_row(row, &IntKeyCodec)?;
        node.validate()?;

        let mut lower = node.k_min;
        let mut pending: Option<&str> = None;
        let check_gap = |lower: i32, upper: i32, pending: Option<&str>| -> Result<()> {
            let expected = model_sum(model, Bound::Excluded(lower), Bound::Excluded(upper));
            let occupied = model
                .range((Bound::Excluded(lower), Bound::Excluded(upper)))
                .next()
                .is_some();
            match pending {
                Some(text) => assert_eq!(
                    Sum.parse_partial(text)?,
                    expected,
                    "gap ({lower}, {upper}) on level {}",
                    node.level
                ),
                None => assert!(!occupied, "gap ({lower}, {upper}) lost its aggregate"),
            }
            Ok(())
        };
        for element in node.context() {
            match element {
                Element::Pair { key, value } => {
                    let expected = model.get(key).map(i32::to_string);
                    assert_eq!(expected.as_deref(), Some(value.as_str()));
                    assert_eq!(extract_level(&key.to_string()), node.level);
                    check_gap(lower, *key, pending.take())?;
                    lower = *key;
                    pairs += 1;
                }
                Element::Aggregate(text) => pending = Some(text),
            }
        }
        check_gap(lower, node.k_max, pending)?;
    }
    assert_eq!(pairs, model.len(), "every key is stored exactly once");
    assert_eq!(tree.root_aggregate()?, model_sum(model, Bound::Unbounded, Bound::Unbounded));
    Ok(())
}

#[test]
fn empty_tree_holds_identity_root() -> Result<()> {
    let tree = sum_tree()?;
    let rows = tree.store().rows()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].context, "A:0;");
    assert_eq!(rows[0].k_min, i32::MIN.to_string());
    assert_eq!(tree.root_aggregate()?, 0);
    assert_eq!(tree.range_query(&1, &100)?, 0);
    assert_eq!(tree.range_query(&i32::MIN, &i32::MAX)?, 0);
    Ok(())
}

#[test]
fn incremental_inserts_keep_every_gap_aggregate() -> Result<()> {
    let mut tree = sum_tree()?;
    let mut model = BTreeMap::new();
    for (step, key) in shuffled(1..=300, 7).into_iter().enumerate() {
        tree.insert(key, &(key * 3))?;
        model.insert(key, key * 3);
        if step % 37 == 0 {
            assert_consistent(&tree, &model)?;
        }
    }
    assert_consistent(&tree, &model)?;
    Ok(())
}

#[test]
fn range_queries_match_brute_force() -> Result<()> {
    let mut tree = sum_tree()?;
    let mut model = BTreeMap::new();
    for key in shuffled((1..=400).map(|k| k * 5), 11) {
        tree.insert(key, &(key % 17))?;
        model.insert(key, key % 17);
    }
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for _ in 0..200 {
        let a = rng.gen_range(-10..2_020);
        let b = rng.gen_range(-10..2_020);
        let (k1, k2) = (a.min(b), a.max(b));
        let expected = model_sum(&model, Bound::Included(k1), Bound::Included(k2));
        assert_eq!(tree.range_query(&k1, &k2)?, expected, "range [{k1}, {k2}]");
    }
    // Bounds on stored keys and single-key ranges.
    assert_eq!(tree.range_query(&5, &5)?, 5);
    assert_eq!(tree.range_query(&6, &9)?, 0);
    assert_eq!(
        tree.range_query(&5, &2_000)?,
        model_sum(&model, Bound::Unbounded, Bound::Unbounded)
    );
    Ok(())
}

#[test]
fn one_sided_sentinel_ranges_are_answered() -> Result<()> {
    let mut tree = sum_tree()?;
    let mut model = BTreeMap::new();
    for key in shuffled(1..=120, 3) {
        tree.insert(key, &key)?;
        model.insert(key, key);
    }
    for pivot in [0, 1, 37, 60, 120, 121] {
        assert_eq!(
            tree.range_query(&i32::MIN, &pivot)?,
            model_sum(&model, Bound::Unbounded, Bound::Included(pivot))
        );
        assert_eq!(
            tree.range_query(&pivot, &i32::MAX)?,
            model_sum(&model, Bound::Included(pivot), Bound::Unbounded)
        );
    }
    Ok(())
}

#[test]
fn inverted_range_is_rejected() -> Result<()> {
    let tree = sum_tree()?;
    let err = tree.range_query(&10, &9);
    assert!(matches!(err, Err(DbTreeError::InvariantViolation(_))));
    Ok(())
}

#[test]
fn deletes_merge_split_nodes() -> Result<()> {
    let mut tree = sum_tree()?;
    let mut model = BTreeMap::new();
    for key in shuffled(1..=250, 21) {
        tree.insert(key, &(key + 1))?;
        model.insert(key, key + 1);
    }
    for (step, key) in shuffled(1..=250, 22).into_iter().take(180).enumerate() {
        tree.delete(&key)?;
        model.remove(&key);
        if step % 23 == 0 {
            assert_consistent(&tree, &model)?;
        }
    }
    assert_consistent(&tree, &model)?;
    Ok(())
}

#[test]
fn deleting_every_key_restores_the_empty_root() -> Result<()> {
    let mut tree = sum_tree()?;
    let keys = shuffled(1..=64, 5);
    for key in &keys {
        tree.insert(*key, key)?;
    }
    for key in shuffled(1..=64, 6) {
        tree.delete(&key)?;
    }
    let rows = tree.store().rows()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].context, "A:0;");
    Ok(())
}

#[test]
fn reinserting_after_delete_restores_totals() -> Result<()> {
    let mut tree = sum_tree()?;
    for key in shuffled(1..=100, 8) {
        tree.insert(key, &key)?;
    }
    tree.delete(&40)?;
    assert_eq!(tree.root_aggregate()?, 5_050 - 40);
    assert_eq!(tree.range_query(&30, &50)?, (30..=50).sum::<i64>() - 40);
    tree.insert(40, &40)?;
    assert_eq!(tree.root_aggregate()?, 5_050);
    Ok(())
}

#[test]
fn update_shifts_aggregates_by_the_difference() -> Result<()> {
    let mut tree = sum_tree()?;
    let mut model = BTreeMap::new();
    for key in shuffled(1..=80, 13) {
        tree.insert(key, &10)?;
        model.insert(key, 10);
    }
    let before = tree.range_query(&20, &60)?;
    tree.update(&33, &-5)?;
    model.insert(33, -5);
    assert_eq!(tree.range_query(&20, &60)?, before - 15);
    assert_eq!(tree.range_query(&34, &60)?, 27 * 10);
    assert_consistent(&tree, &model)?;
    Ok(())
}

#[test]
fn preconditions_fail_without_touching_the_store() -> Result<()> {
    let mut tree = sum_tree()?;
    for key in [5, 9, 14] {
        tree.insert(key, &1)?;
    }
    let before = tree.store().rows()?;

    assert!(matches!(tree.insert(9, &2), Err(DbTreeError::InvariantViolation(_))));
    assert!(matches!(tree.update(&10, &2), Err(DbTreeError::InvariantViolation(_))));
    assert!(matches!(tree.delete(&10), Err(DbTreeError::InvariantViolation(_))));
    assert!(matches!(
        tree.authenticated_query(&10),
        Err(DbTreeError::InvariantViolation(_))
    ));
    assert!(tree.insert(i32::MAX, &1).is_err());
    assert!(tree.delete(&i32::MIN).is_err());

    assert_eq!(tree.store().rows()?, before);
    Ok(())
}

#[test]
fn batch_load_builds_the_incremental_tree() -> Result<()> {
    let keys = shuffled(1..=500, 31);
    let mut incremental = sum_tree()?;
    for key in &keys {
        incremental.insert(*key, &(key * 2))?;
    }
    let mut batch = sum_tree()?;
    batch.insert_batch(shuffled(1..=500, 32).into_iter().map(|k| (k, k * 2)))?;

    // Levels only depend on the keys, so both builds converge on the same nodes.
    assert_eq!(batch.store().rows()?, incremental.store().rows()?);
    let model: BTreeMap<i32, i32> = keys.iter().map(|k| (*k, k * 2)).collect();
    assert_consistent(&batch, &model)?;
    Ok(())
}

#[test]
fn batch_load_preconditions() -> Result<()> {
    let mut tree = sum_tree()?;
    tree.insert_batch(Vec::new())?;
    assert_eq!(tree.store().node_count()?, 1);

    let err = tree.insert_batch(vec![(1, 1), (2, 2), (1, 3)]);
    assert!(matches!(err, Err(DbTreeError::InvariantViolation(_))));
    assert_eq!(tree.store().node_count()?, 1);

    tree.insert(7, &7)?;
    let err = tree.insert_batch(vec![(1, 1)]);
    assert!(matches!(err, Err(DbTreeError::InvariantViolation(_))));
    Ok(())
}

#[test]
fn batch_loaded_tree_accepts_mutations() -> Result<()> {
    let mut tree = sum_tree()?;
    let mut model: BTreeMap<i32, i32> = (1..=200).map(|k| (k * 2, k)).collect();
    tree.insert_batch(model.iter().map(|(k, v)| (*k, *v)))?;
    for key in [3, 101, 399] {
        tree.insert(key, &1_000)?;
        model.insert(key, 1_000);
    }
    for key in [2, 150, 400] {
        tree.delete(&key)?;
        model.remove(&key);
    }
    tree.update(&200, &-1)?;
    model.insert(200, -1);
    assert_consistent(&tree, &model)?;
    Ok(())
}

#[test]
fn hash_chain_proofs_replay_to_the_root() -> Result<()> {
    let mut tree = DbTree::open(
        HashChain,
        MemoryStore::new(IntKeyCodec),
        DbTreeOptions::sequential(),
    )?;
    for key in shuffled(1..=150, 41) {
        tree.insert(key, &(key * 7))?;
    }
    let root = tree.root_aggregate()?;
    for key in [1, 2, 75, 149, 150] {
        let answer = tree.authenticated_query(&key)?;
        assert_eq!(answer.value, key * 7);
        assert_eq!(answer.proof.verify(&HashChain, &answer.value)?, root);
        assert_ne!(answer.proof.verify(&HashChain, &(key * 7 + 1))?, root);
    }
    Ok(())
}

#[test]
fn proofs_work_for_additive_aggregates() -> Result<()> {
    let mut tree = sum_tree()?;
    for key in shuffled(1..=60, 17) {
        tree.insert(key, &key)?;
    }
    let answer = tree.authenticated_query(&42)?;
    assert_eq!(answer.proof.verify(&Sum, &answer.value)?, 1_830);
    assert_eq!(answer.proof.verify(&Sum, &0)?, 1_830 - 42);
    Ok(())
}

#[test]
fn other_aggregators_fold_ranges() -> Result<()> {
    let values: Vec<(i32, i32)> = (1..=90).map(|k| (k, (k * 37) % 101 - 50)).collect();
    let in_range = |lo: i32, hi: i32| values.iter().filter(move |(k, _)| *k >= lo && *k <= hi);

    let store = || MemoryStore::new(IntKeyCodec);
    let options = DbTreeOptions::sequential;
    let mut count = DbTree::open(Count, store(), options())?;
    let mut sum_count = DbTree::open(SumCount, store(), options())?;
    let mut average = DbTree::open(Average, store(), options())?;
    let mut min = DbTree::open(MinInt, store(), options())?;
    let mut max = DbTree::open(MaxInt, store(), options())?;
    for (key, value) in shuffled(1..=90, 2).into_iter().map(|k| values[k as usize - 1]) {
        count.insert(key, &value)?;
        sum_count.insert(key, &value)?;
        average.insert(key, &value)?;
        min.insert(key, &value)?;
        max.insert(key, &value)?;
    }

    let (lo, hi) = (12, 71);
    let sum: i64 = in_range(lo, hi).map(|(_, v)| i64::from(*v)).sum();
    let n = in_range(lo, hi).count() as i64;
    assert_eq!(count.range_query(&lo, &hi)?, n);
    assert_eq!(sum_count.range_query(&lo, &hi)?, (sum, n));
    assert_eq!(average.range_query(&lo, &hi)?, sum / n);
    let lowest = in_range(lo, hi).map(|(_, v)| *v).min();
    let highest = in_range(lo, hi).map(|(_, v)| *v).max();
    assert_eq!(Some(min.range_query(&lo, &hi)?), lowest);
    assert_eq!(Some(max.range_query(&lo, &hi)?), highest);
    assert_eq!(min.range_query(&200, &300)?, i32::MAX);
    Ok(())
}

#[test]
fn group_by_aggregates_each_group_slice() -> Result<()> {
    let options = DbTreeOptions::default().group_by_threads(2);
    let mut tree = DbTree::open(Sum, MemoryStore::new(PairKeyCodec), options)?;
    let mut keys: Vec<PairKey> = (1..=4)
        .flat_map(|x| (1..=40).map(move |y| PairKey::new(x, y)))
        .collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(61));
    for key in keys {
        tree.insert(key, &(key.x * 100 + key.y))?;
    }

    let groups = tree.group_by(&5, &20)?;
    let expected: Vec<(i32, i64)> = (1..=4)
        .map(|x| (x, (5..=20).map(|y| i64::from(x * 100 + y)).sum()))
        .collect();
    assert_eq!(groups, expected);

    for (x, total) in &expected {
        let direct = tree.range_query(&PairKey::new(*x, 5), &PairKey::new(*x, 20))?;
        assert_eq!(direct, *total);
    }
    assert!(matches!(tree.group_by(&9, &3), Err(DbTreeError::InvariantViolation(_))));
    Ok(())
}

#[test]
fn group_by_keeps_groups_bound_to_sentinels() -> Result<()> {
    let store = MemoryStore::new(PairKeyCodec);
    let mut tree = DbTree::open(Sum, store, DbTreeOptions::sequential())?;
    tree.insert(PairKey::new(i32::MIN, 5), &3)?;
    tree.insert(PairKey::new(0, 0), &4)?;
    tree.insert(PairKey::new(i32::MAX, -2), &5)?;

    assert_eq!(
        tree.group_by(&i32::MIN, &i32::MAX)?,
        vec![(i32::MIN, 3), (0, 4), (i32::MAX, 5)]
    );
    assert_eq!(
        tree.range_query(&PairKey::new(i32::MIN, i32::MIN), &PairKey::new(0, 0))?,
        7
    );
    let low: Vec<(i32, i64)> = tree
        .group_by(&i32::MIN, &0)?
        .into_iter()
        .filter(|(_, total)| *total != 0)
        .collect();
    assert_eq!(low, vec![(0, 4), (i32::MAX, 5)]);
    Ok(())
}

#[test]
fn parallel_fetches_agree_with_sequential() -> Result<()> {
    let mut sequential = sum_tree()?;
    let mut parallel = DbTree::open(
        Sum,
        MemoryStore::new(IntKeyCodec),
        DbTreeOptions::default().group_by_threads(3),
    )?;
    for key in shuffled(1..=200, 71) {
        sequential.insert(key, &key)?;
        parallel.insert(key, &key)?;
    }
    for (k1, k2) in [(1, 200), (17, 18), (50, 150), (i32::MIN, 99), (101, i32::MAX)] {
        assert_eq!(parallel.range_query(&k1, &k2)?, sequential.range_query(&k1, &k2)?);
    }
    Ok(())
}

#[test]
fn closed_tree_reports_store_errors() -> Result<()> {
    let mut tree = sum_tree()?;
    tree.insert(1, &1)?;
    tree.close()?;
    assert!(tree.is_closed());
    assert!(matches!(tree.root_aggregate(), Err(DbTreeError::Store(_))));
    assert!(matches!(tree.insert(2, &2), Err(DbTreeError::Store(_))));
    Ok(())
}
