#![allow(missing_docs)]

use std::collections::BTreeMap;

use dbtree::aggregate::{Aggregator, Count, Sum};
use dbtree::codec::IntKeyCodec;
use dbtree::store::MemoryStore;
use dbtree::tree::{DbTree, DbTreeOptions, Node};
use dbtree::types::Result;
use proptest::prelude::*;

type Tree<F> = DbTree<IntKeyCodec, F, MemoryStore<IntKeyCodec>>;

fn tree_of<F: Aggregator<Value = i32>>(agg: F, model: &BTreeMap<i32, i32>) -> Result<Tree<F>> {
    let mut tree = DbTree::open(agg, MemoryStore::new(IntKeyCodec), DbTreeOptions::sequential())?;
    for (key, value) in model {
        tree.insert(*key, value)?;
    }
    Ok(tree)
}

fn brute_sum(model: &BTreeMap<i32, i32>, k1: i32, k2: i32) -> i64 {
    model.range(k1..=k2).map(|(_, v)| i64::from(*v)).sum()
}

fn arb_model() -> impl Strategy<Value = BTreeMap<i32, i32>> {
    prop::collection::btree_map(-300i32..300, -1_000i32..1_000, 0..120)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_range_matches_brute_force(
        model in arb_model(),
        bounds in prop::collection::vec((-320i32..320, -320i32..320), 1..20),
    ) {
        let tree = tree_of(Sum, &model)?;
        for (a, b) in bounds {
            let (k1, k2) = (a.min(b), a.max(b));
            prop_assert_eq!(tree.range_query(&k1, &k2)?, brute_sum(&model, k1, k2));
        }
    }

    #[test]
    fn prop_adjacent_ranges_are_additive(
        model in arb_model(),
        a in -320i32..320,
        width_left in 0i32..200,
        width_right in 1i32..200,
    ) {
        let tree = tree_of(Sum, &model)?;
        let b = a + width_left;
        let c = b + width_right;
        let left = tree.range_query_raw(&a, &b)?;
        let right = tree.range_query_raw(&(b + 1), &c)?;
        prop_assert_eq!(Sum.combine(&[left, right]), tree.range_query_raw(&a, &c)?);
    }

    #[test]
    fn prop_full_domain_equals_fold_of_all_pairs(model in arb_model()) {
        let tree = tree_of(Count, &model)?;
        let lifted: Vec<i64> = model.values().map(|v| Count.lift(v)).collect();
        let expected = Count.finalize(&Count.combine(&lifted));
        prop_assert_eq!(tree.range_query(&i32::MIN, &i32::MAX)?, expected);
        prop_assert_eq!(tree.root_aggregate()?, expected);
    }

    #[test]
    fn prop_insert_then_delete_is_identity(
        model in arb_model(),
        key in -300i32..300,
        value in -1_000i32..1_000,
    ) {
        prop_assume!(!model.contains_key(&key));
        let mut tree = tree_of(Sum, &model)?;
        let before = tree.store().rows()?;
        let total = tree.root_aggregate()?;

        tree.insert(key, &value)?;
        prop_assert_eq!(tree.root_aggregate()?, total + i64::from(value));
        tree.delete(&key)?;
        prop_assert_eq!(tree.root_aggregate()?, total);
        // Levels depend on keys only, so the structure is restored too.
        prop_assert_eq!(tree.store().rows()?, before);
    }

    #[test]
    fn prop_update_shifts_by_delta(
        model in prop::collection::btree_map(-300i32..300, -1_000i32..1_000, 1..120),
        pick in any::<prop::sample::Index>(),
        value in -1_000i32..1_000,
    ) {
        let (key, old) = model
            .iter()
            .nth(pick.index(model.len()))
            .map(|(k, v)| (*k, *v))
            .unwrap_or_default();
        let mut tree = tree_of(Sum, &model)?;
        let total = tree.root_aggregate()?;
        tree.update(&key, &value)?;
        prop_assert_eq!(tree.root_aggregate()?, total - i64::from(old) + i64::from(value));
        prop_assert_eq!(tree.range_query(&key, &key)?, i64::from(value));
    }

    #[test]
    fn prop_batch_load_equals_incremental(model in arb_model(), seed in any::<u64>()) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let incremental = tree_of(Sum, &model)?;
        let mut pairs: Vec<(i32, i32)> = model.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.shuffle(&mut rand_chacha::ChaCha8Rng::seed_from_u64(seed));
        let mut batch =
            DbTree::open(Sum, MemoryStore::new(IntKeyCodec), DbTreeOptions::sequential())?;
        batch.insert_batch(pairs)?;

        prop_assert_eq!(batch.root_aggregate()?, incremental.root_aggregate()?);
        prop_assert_eq!(batch.store().rows()?, incremental.store().rows()?);
    }

    #[test]
    fn prop_every_node_is_well_formed(
        model in arb_model(),
        deletions in prop::collection::vec(any::<prop::sample::Index>(), 0..60),
    ) {
        let mut tree = tree_of(Sum, &model)?;
        let mut model = model;
        for pick in deletions {
            if model.is_empty() {
                break;
            }
            let key = *model.keys().nth(pick.index(model.len())).unwrap_or(&0);
            tree.delete(&key)?;
            model.remove(&key);
        }
        for row in tree.store().rows()? {
            Node::from_row(&row, &IntKeyCodec)?.validate()?;
        }
        prop_assert_eq!(tree.root_aggregate()?, brute_sum(&model, i32::MIN, i32::MAX));
    }
}
