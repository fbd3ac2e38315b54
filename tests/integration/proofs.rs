#![allow(missing_docs)]

use std::error::Error;

use dbtree::aggregate::{HashChain, Sum};
use dbtree::codec::IntKeyCodec;
use dbtree::store::{MemoryStore, SqliteStore};
use dbtree::tree::{DbTree, DbTreeOptions, Proof, ProofSlot};
use dbtree::DbTreeError;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

type TestResult = std::result::Result<(), Box<dyn Error>>;

#[test]
fn every_stored_key_verifies_against_the_root() -> TestResult {
    let mut tree = DbTree::open(
        HashChain,
        MemoryStore::new(IntKeyCodec),
        DbTreeOptions::default(),
    )?;
    let mut keys: Vec<i32> = (1..=400).collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0xa11));
    for key in &keys {
        tree.insert(*key, &(key * 11))?;
    }
    for key in keys.iter().filter(|k| *k % 3 == 0) {
        tree.delete(key)?;
    }

    let root = tree.root_aggregate()?;
    for key in (1..=400).filter(|k| k % 3 != 0) {
        let answer = tree.authenticated_query(&key)?;
        assert_eq!(answer.value, key * 11);
        assert_eq!(answer.proof.verify(&HashChain, &answer.value)?, root);
    }
    assert!(tree.authenticated_query(&3).is_err());
    Ok(())
}

#[test]
fn proofs_survive_serialization() -> TestResult {
    let mut tree = DbTree::open(
        HashChain,
        SqliteStore::in_memory(IntKeyCodec)?,
        DbTreeOptions::default(),
    )?;
    tree.insert_batch((1..=300).map(|k| (k, k)))?;
    let root = tree.root_aggregate()?;

    let answer = tree.authenticated_query(&123)?;
    let wire = serde_json::to_string(&answer.proof)?;
    let proof: Proof<String> = serde_json::from_str(&wire)?;
    assert_eq!(proof, answer.proof);
    assert_eq!(proof.verify(&HashChain, &123)?, root);
    Ok(())
}

#[test]
fn tampered_proofs_are_detected() -> TestResult {
    let mut tree = DbTree::open(
        HashChain,
        MemoryStore::new(IntKeyCodec),
        DbTreeOptions::default(),
    )?;
    tree.insert_batch((1..=200).map(|k| (k, k)))?;
    let root = tree.root_aggregate()?;
    let answer = tree.authenticated_query(&77)?;

    assert_ne!(answer.proof.verify(&HashChain, &78)?, root);

    let mut entries = answer.proof.entries().to_vec();
    let slot = entries[0]
        .iter()
        .position(|slot| matches!(slot, ProofSlot::Literal(_)));
    if let Some(index) = slot {
        entries[0][index] = ProofSlot::Literal("00".repeat(32));
        let forged = Proof::new(entries.clone());
        assert_ne!(forged.verify(&HashChain, &77)?, root);
    }

    entries[0].push(ProofSlot::Placeholder);
    let broken = Proof::new(entries);
    assert!(matches!(
        broken.verify(&HashChain, &77),
        Err(DbTreeError::InvariantViolation(_))
    ));
    Ok(())
}

#[test]
fn sum_proofs_rebuild_the_total() -> TestResult {
    let mut tree = DbTree::open(Sum, MemoryStore::new(IntKeyCodec), DbTreeOptions::default())?;
    tree.insert_batch((1..=1_000).map(|k| (k, k)))?;
    let answer = tree.authenticated_query(&640)?;
    assert_eq!(answer.proof.root_partial(&Sum, &640)?, 500_500);
    assert_eq!(answer.proof.root_partial(&Sum, &0)?, 500_500 - 640);
    assert!(!answer.proof.is_empty());
    Ok(())
}
