use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use starknet_types_core::felt::Felt;
use starknet_types_core::hash::{Pedersen, StarkHash};

use crate::db::memory::MemDb;
use super::key::TrieKey;
use super::{felt_to_key, PedersenTrie, Trie};

const PREFIX: u8 = 0xf0;

fn new_trie(db: &MemDb) -> PedersenTrie<'_, MemDb> {
    Trie::new(db, vec![PREFIX]).unwrap()
}

// Hash of a node value reached through the edge `path`.
fn edge_hash(value: &Felt, path: &TrieKey) -> Felt {
    Pedersen::hash(value, &path.felt()) + Felt::from(path.len())
}

#[test]
fn empty_trie() {
    let db = MemDb::new();
    let trie = new_trie(&db);
    assert_eq!(trie.root().unwrap(), Felt::ZERO);
    assert_eq!(trie.root_key(), None);
    assert_eq!(trie.get(&Felt::ONE).unwrap(), Felt::ZERO);
}

#[test]
fn single_leaf_root() {
    let db = MemDb::new();
    let mut trie = new_trie(&db);
    let key = Felt::from(0x123_u64);
    let value = Felt::from(0x456_u64);
    assert_eq!(trie.put(&key, &value).unwrap(), Some(Felt::ZERO));
    assert_eq!(trie.get(&key).unwrap(), value);
    assert_eq!(trie.root().unwrap(), edge_hash(&value, &felt_to_key(&key)));
}

// Two leaves under keys 0 and 1: a 250-bit zero edge into a binary node.
#[test]
fn two_leaf_root() {
    let db = MemDb::new();
    let mut trie = new_trie(&db);
    trie.put(&Felt::ZERO, &Felt::TWO).unwrap();
    trie.put(&Felt::ONE, &Felt::THREE).unwrap();

    let binary = Pedersen::hash(&Felt::TWO, &Felt::THREE);
    let path = felt_to_key(&Felt::ZERO).most_significant_bits(250).unwrap();
    assert_eq!(trie.root().unwrap(), edge_hash(&binary, &path));
    assert_eq!(trie.get(&Felt::ZERO).unwrap(), Felt::TWO);
    assert_eq!(trie.get(&Felt::ONE).unwrap(), Felt::THREE);
}

#[test]
fn put_returns_the_previous_value() {
    let db = MemDb::new();
    let mut trie = new_trie(&db);
    let key = Felt::from(0xdead_u64);
    assert_eq!(trie.put(&key, &Felt::ONE).unwrap(), Some(Felt::ZERO));
    assert_eq!(trie.put(&key, &Felt::TWO).unwrap(), Some(Felt::ONE));
    // An identical write changes nothing.
    assert_eq!(trie.put(&key, &Felt::TWO).unwrap(), None);
    assert_eq!(trie.put(&key, &Felt::ZERO).unwrap(), Some(Felt::TWO));
    assert_eq!(trie.put(&key, &Felt::ZERO).unwrap(), None);
}

#[test]
fn delete_restores_the_previous_root() {
    let db = MemDb::new();
    let mut trie = new_trie(&db);
    trie.put(&Felt::from(10_u64), &Felt::from(100_u64)).unwrap();
    trie.put(&Felt::from(11_u64), &Felt::from(101_u64)).unwrap();
    let root_before = trie.root().unwrap();

    trie.put(&Felt::from(12_u64), &Felt::from(102_u64)).unwrap();
    assert_ne!(trie.root().unwrap(), root_before);
    trie.put(&Felt::from(12_u64), &Felt::ZERO).unwrap();
    assert_eq!(trie.root().unwrap(), root_before);

    // Deleting an absent key is a no-op.
    assert_eq!(trie.put(&Felt::from(999_u64), &Felt::ZERO).unwrap(), None);
    assert_eq!(trie.root().unwrap(), root_before);
    // Unaffected keys still read back.
    assert_eq!(trie.get(&Felt::from(10_u64)).unwrap(), Felt::from(100_u64));
    assert_eq!(trie.get(&Felt::from(11_u64)).unwrap(), Felt::from(101_u64));
}

// Deleting a leaf fuses its sibling subtree into the edge above; the result
// must be indistinguishable from a trie that never held the leaf.
#[test]
fn delete_collapses_unary_nodes() {
    let db = MemDb::new();
    let mut trie = new_trie(&db);
    for (key, value) in [(0_u64, 4_u64), (1, 5), (2, 6)] {
        trie.put(&Felt::from(key), &Felt::from(value)).unwrap();
    }
    trie.put(&Felt::ONE, &Felt::ZERO).unwrap();

    let other_db = MemDb::new();
    let mut other = new_trie(&other_db);
    other.put(&Felt::ZERO, &Felt::from(4_u64)).unwrap();
    other.put(&Felt::TWO, &Felt::from(6_u64)).unwrap();

    assert_eq!(trie.root().unwrap(), other.root().unwrap());
    assert_eq!(trie.get(&Felt::ONE).unwrap(), Felt::ZERO);
}

#[test]
fn root_is_independent_of_insertion_order() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut entries: Vec<(Felt, Felt)> = (0..30)
        .map(|_| (Felt::from(rng.gen::<u128>()), Felt::from(rng.gen::<u128>() | 1)))
        .collect();

    let db = MemDb::new();
    let mut trie = new_trie(&db);
    for (key, value) in &entries {
        trie.put(key, value).unwrap();
    }
    let root = trie.root().unwrap();

    entries.shuffle(&mut rng);
    let other_db = MemDb::new();
    let mut other = new_trie(&other_db);
    for (key, value) in &entries {
        other.put(key, value).unwrap();
    }
    assert_eq!(other.root().unwrap(), root);

    for (key, value) in &entries {
        assert_eq!(other.get(key).unwrap(), *value);
    }
    // Keys that were never inserted read as zero.
    assert_eq!(other.get(&Felt::from(rng.gen::<u64>())).unwrap(), Felt::ZERO);
}

#[test]
fn commit_persists_across_instances() {
    let db = MemDb::new();
    let mut trie = new_trie(&db);
    let entries = [(3_u64, 7_u64), (5, 11), (1 << 40, 13)];
    for (key, value) in entries {
        trie.put(&Felt::from(key), &Felt::from(value)).unwrap();
    }
    let root = trie.root().unwrap();
    trie.commit().unwrap();
    drop(trie);

    let reopened = new_trie(&db);
    assert_eq!(reopened.root().unwrap(), root);
    for (key, value) in entries {
        assert_eq!(reopened.get(&Felt::from(key)).unwrap(), Felt::from(value));
    }
}

#[test]
fn deleting_everything_clears_the_root_pointer() {
    let db = MemDb::new();
    let mut trie = new_trie(&db);
    trie.put(&Felt::ONE, &Felt::ONE).unwrap();
    trie.put(&Felt::TWO, &Felt::TWO).unwrap();
    trie.commit().unwrap();
    drop(trie);

    let mut trie = new_trie(&db);
    trie.put(&Felt::ONE, &Felt::ZERO).unwrap();
    trie.put(&Felt::TWO, &Felt::ZERO).unwrap();
    trie.commit().unwrap();
    drop(trie);

    let reopened = new_trie(&db);
    assert_eq!(reopened.root_key(), None);
    assert_eq!(reopened.root().unwrap(), Felt::ZERO);
}
