use assert_matches::assert_matches;
use starknet_types_core::felt::Felt;
use starknet_types_core::hash::{Pedersen, StarkHash};

use crate::db::memory::MemDb;
use crate::trie::key::TrieKey;
use crate::trie::node::{Node, StorageNode};
use crate::trie::{felt_to_key, PedersenTrie, Trie};
use super::{
    proof_to_path, verify_proof, verify_range_proof, ProofError, ProofNode, ProofSet,
};

fn new_trie(db: &MemDb) -> PedersenTrie<'_, MemDb> {
    Trie::new(db, vec![0xf0]).unwrap()
}

fn build_trie<'db>(db: &'db MemDb, entries: &[(u64, u64)]) -> PedersenTrie<'db, MemDb> {
    let mut trie = new_trie(db);
    for (key, value) in entries {
        trie.put(&Felt::from(*key), &Felt::from(*value)).unwrap();
    }
    trie
}

fn proof_set(proof: impl IntoIterator<Item = ProofNode>) -> ProofSet {
    ProofSet::new::<Pedersen>(proof)
}

// Keys 0 and 1: the proof of key 1 is the root edge, then the binary over
// the two leaves.
#[test]
fn two_leaf_proof() {
    let db = MemDb::new();
    let trie = build_trie(&db, &[(0, 2), (1, 3)]);

    let proof = trie.get_proof(&Felt::ONE).unwrap();
    let binary_hash = Pedersen::hash(&Felt::TWO, &Felt::THREE);
    let path = felt_to_key(&Felt::ZERO).most_significant_bits(250).unwrap();
    assert_eq!(
        proof,
        vec![
            ProofNode::Edge { child: binary_hash, path },
            ProofNode::Binary { left_hash: Felt::TWO, right_hash: Felt::THREE },
        ]
    );

    let root = trie.root().unwrap();
    let value = verify_proof::<Pedersen>(&root, &Felt::ONE, &proof_set(proof)).unwrap();
    assert_eq!(value, Felt::THREE);
}

#[test]
fn three_leaf_membership_and_absence() {
    let db = MemDb::new();
    let trie = build_trie(&db, &[(0, 4), (1, 5), (2, 6)]);
    let root = trie.root().unwrap();

    let set = proof_set(trie.get_proof(&Felt::TWO).unwrap());
    assert_eq!(verify_proof::<Pedersen>(&root, &Felt::TWO, &set).unwrap(), Felt::from(6_u64));

    // Key 7 diverges inside the root edge: a valid non-membership proof.
    let set = proof_set(trie.get_proof(&Felt::from(7_u64)).unwrap());
    assert_eq!(verify_proof::<Pedersen>(&root, &Felt::from(7_u64), &set).unwrap(), Felt::ZERO);
}

// A key that leaves the trie high up is proven absent by the prefix of any
// canonical path.
#[test]
fn absent_key_proof_is_a_path_prefix() {
    let db = MemDb::new();
    let trie = build_trie(&db, &[(0, 2), (1, 3), (3, 5)]);
    let root = trie.root().unwrap();

    let absent = Felt::from(123_u64);
    let proof = trie.get_proof(&absent).unwrap();
    let canonical = trie.get_proof(&Felt::ZERO).unwrap();
    assert_eq!(&proof[..], &canonical[..2]);

    assert_eq!(verify_proof::<Pedersen>(&root, &absent, &proof_set(proof)).unwrap(), Felt::ZERO);
}

#[test]
fn every_key_verifies_against_the_root() {
    let db = MemDb::new();
    let entries: Vec<(u64, u64)> = (0..40).map(|i| (i * i + 1, i + 100)).collect();
    let trie = build_trie(&db, &entries);
    let root = trie.root().unwrap();

    for (key, value) in &entries {
        let key = Felt::from(*key);
        let set = proof_set(trie.get_proof(&key).unwrap());
        assert_eq!(verify_proof::<Pedersen>(&root, &key, &set).unwrap(), Felt::from(*value));
    }
}

#[test]
fn tampered_proof_fails() {
    let db = MemDb::new();
    let trie = build_trie(&db, &[(0, 4), (1, 5), (2, 6)]);
    let root = trie.root().unwrap();
    let proof = trie.get_proof(&Felt::TWO).unwrap();

    // Corrupting any node changes its hash, breaking the chain from the root.
    for index in 0..proof.len() {
        let mut tampered = proof.clone();
        tampered[index] = match &tampered[index] {
            ProofNode::Binary { left_hash, right_hash } => ProofNode::Binary {
                left_hash: *left_hash + Felt::ONE,
                right_hash: *right_hash,
            },
            ProofNode::Edge { child, path } => {
                ProofNode::Edge { child: *child + Felt::ONE, path: *path }
            }
        };
        let result = verify_proof::<Pedersen>(&root, &Felt::TWO, &proof_set(tampered));
        assert!(!matches!(result, Ok(value) if value == Felt::from(6_u64)));
    }

    // A node filed under a hash it does not match is rejected outright.
    let mut forged = proof_set(proof);
    forged.insert(root, ProofNode::Binary { left_hash: Felt::ONE, right_hash: Felt::TWO });
    assert_matches!(
        verify_proof::<Pedersen>(&root, &Felt::TWO, &forged),
        Err(ProofError::ProofNodeHashMismatch { .. })
    );
}

#[test]
fn proof_against_a_different_root_fails() {
    let db = MemDb::new();
    let trie = build_trie(&db, &[(0, 4), (1, 5)]);
    let set = proof_set(trie.get_proof(&Felt::ZERO).unwrap());
    let wrong_root = trie.root().unwrap() + Felt::ONE;
    assert_matches!(
        verify_proof::<Pedersen>(&wrong_root, &Felt::ZERO, &set),
        Err(ProofError::MissingProofNode(_))
    );
}

#[test]
fn proof_to_path_rebuilds_the_storage_nodes() {
    let db = MemDb::new();
    let trie = build_trie(&db, &[(0, 2), (1, 3)]);
    let root = trie.root().unwrap();
    let leaf_key = felt_to_key(&Felt::ZERO);

    let set = proof_set(trie.get_proof(&Felt::ZERO).unwrap());
    let path = proof_to_path::<Pedersen>(&set, &leaf_key, &root).unwrap();

    assert_eq!(path.len(), 2);
    // The edge and the binary fuse back into the single stored root node.
    assert_eq!(path[0].key.len(), 250);
    assert_eq!(path[0].node.value, Pedersen::hash(&Felt::TWO, &Felt::THREE));
    assert_eq!(path[0].node.left, Some(leaf_key));
    // The off-path child cannot be named by the proof, only its hash.
    assert_eq!(path[0].node.right, Some(TrieKey::default()));
    assert_eq!(path[0].node.right_hash, Some(Felt::THREE));
    assert_eq!(path[1], StorageNode { key: leaf_key, node: Node::leaf(Felt::TWO) });
}

fn range_fixture() -> (MemDb, Vec<Felt>, Vec<Felt>) {
    let db = MemDb::new();
    let entries: Vec<(u64, u64)> = (1..=10).map(|i| (i, i + 100)).collect();
    build_trie(&db, &entries).commit().unwrap();
    let keys = entries.iter().map(|(k, _)| Felt::from(*k)).collect();
    let values = entries.iter().map(|(_, v)| Felt::from(*v)).collect();
    (db, keys, values)
}

#[test]
fn range_proof_of_the_whole_trie_needs_no_proofs() {
    let (db, keys, values) = range_fixture();
    let root = new_trie(&db).root().unwrap();
    verify_range_proof::<Pedersen>(&root, &keys[0], &keys, &values, None).unwrap();
}

#[test]
fn range_proof_with_boundary_proofs() {
    let (db, keys, values) = range_fixture();
    let trie = new_trie(&db);
    let root = trie.root().unwrap();

    // Keys 3..=7 out of 1..=10.
    let mut proof = trie.get_proof(&keys[2]).unwrap();
    proof.extend(trie.get_proof(&keys[6]).unwrap());
    let set = proof_set(proof);
    verify_range_proof::<Pedersen>(&root, &keys[2], &keys[2..=6], &values[2..=6], Some(&set))
        .unwrap();
}

#[test]
fn range_proof_of_a_single_key() {
    let (db, keys, values) = range_fixture();
    let trie = new_trie(&db);
    let root = trie.root().unwrap();

    let set = proof_set(trie.get_proof(&keys[4]).unwrap());
    verify_range_proof::<Pedersen>(&root, &keys[4], &keys[4..=4], &values[4..=4], Some(&set))
        .unwrap();
}

#[test]
fn range_proof_detects_a_missing_key() {
    let (db, keys, values) = range_fixture();
    let trie = new_trie(&db);
    let root = trie.root().unwrap();

    let mut proof = trie.get_proof(&keys[2]).unwrap();
    proof.extend(trie.get_proof(&keys[6]).unwrap());
    let set = proof_set(proof);

    // Drop key 5 from the middle of the range.
    let mut partial_keys = keys[2..=6].to_vec();
    let mut partial_values = values[2..=6].to_vec();
    partial_keys.remove(2);
    partial_values.remove(2);
    assert_matches!(
        verify_range_proof::<Pedersen>(&root, &keys[2], &partial_keys, &partial_values, Some(&set)),
        Err(ProofError::RootMismatch { .. })
    );
}

#[test]
fn range_proof_detects_a_tampered_value() {
    let (db, keys, values) = range_fixture();
    let trie = new_trie(&db);
    let root = trie.root().unwrap();

    let mut proof = trie.get_proof(&keys[2]).unwrap();
    proof.extend(trie.get_proof(&keys[6]).unwrap());
    let set = proof_set(proof);

    let mut tampered = values[2..=6].to_vec();
    tampered[1] = tampered[1] + Felt::ONE;
    assert_matches!(
        verify_range_proof::<Pedersen>(&root, &keys[2], &keys[2..=6], &tampered, Some(&set)),
        Err(ProofError::RootMismatch { .. })
    );
}

#[test]
fn range_proof_rejects_malformed_input() {
    let (db, keys, values) = range_fixture();
    let root = new_trie(&db).root().unwrap();

    assert_matches!(
        verify_range_proof::<Pedersen>(&root, &keys[0], &keys, &values[1..], None),
        Err(ProofError::KeyValueCountMismatch { .. })
    );
    assert_matches!(
        verify_range_proof::<Pedersen>(&root, &keys[0], &[], &[], None),
        Err(ProofError::Malformed(_))
    );

    let mut descending = keys.clone();
    descending.swap(2, 3);
    assert_matches!(
        verify_range_proof::<Pedersen>(&root, &descending[0], &descending, &values, None),
        Err(ProofError::NonMonotonicRange)
    );

    let mut with_deletion = values.clone();
    with_deletion[4] = Felt::ZERO;
    assert_matches!(
        verify_range_proof::<Pedersen>(&root, &keys[0], &keys, &with_deletion, None),
        Err(ProofError::DeletionInRange)
    );
}
