//! Merkle proofs over the trie.
//!
//! The wire protocol sees a path as a sequence of nodes that are Binary XOR
//! Edge, while a stored node can be both at once (an edge from its parent
//! and a binary to its children). Proof generation projects each storage
//! node into zero, one or two proof nodes; verification is a state machine
//! over the typed variants, addressed by node hash.

#[cfg(test)]
#[path = "proof_test.rs"]
mod proof_test;

use std::collections::HashMap;

use starknet_types_core::felt::Felt;
use starknet_types_core::hash::StarkHash;

use crate::db::memory::MemDb;
use crate::db::DbTx;
use super::key::TrieKey;
use super::node::{edge_path, hash_with_path, Node, StorageNode};
use super::{felt_to_key, Trie, TrieError, TRIE_HEIGHT};

#[derive(thiserror::Error, Debug)]
pub enum ProofError {
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error("Proof node with hash {0:#x} is missing from the proof set.")]
    MissingProofNode(Felt),
    #[error("Proof node hashes to {computed:#x}, expected {expected:#x}.")]
    ProofNodeHashMismatch { expected: Felt, computed: Felt },
    #[error("Malformed proof: {0}.")]
    Malformed(&'static str),
    #[error("Inconsistent proof data: {keys} keys, {values} values.")]
    KeyValueCountMismatch { keys: usize, values: usize },
    #[error("Range keys are not monotonically increasing.")]
    NonMonotonicRange,
    #[error("Range contains a deletion.")]
    DeletionInRange,
    #[error("Reconstructed root {computed:#x} does not match the expected root {expected:#x}.")]
    RootMismatch { expected: Felt, computed: Felt },
}

/// A single node of a Merkle proof.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProofNode {
    Binary { left_hash: Felt, right_hash: Felt },
    Edge { child: Felt, path: TrieKey },
}

impl ProofNode {
    pub fn hash<H: StarkHash>(&self) -> Felt {
        match self {
            ProofNode::Binary { left_hash, right_hash } => H::hash(left_hash, right_hash),
            ProofNode::Edge { child, path } => hash_with_path::<H>(child, path),
        }
    }

    /// The number of key bits this node consumes.
    pub fn len(&self) -> u8 {
        match self {
            ProofNode::Binary { .. } => 1,
            ProofNode::Edge { path, .. } => path.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A content-addressed set of proof nodes, keyed by node hash.
#[derive(Debug, Default)]
pub struct ProofSet(HashMap<Felt, ProofNode>);

impl ProofSet {
    pub fn new<H: StarkHash>(nodes: impl IntoIterator<Item = ProofNode>) -> Self {
        Self(nodes.into_iter().map(|node| (node.hash::<H>(), node)).collect())
    }

    pub fn insert(&mut self, hash: Felt, node: ProofNode) {
        self.0.insert(hash, node);
    }

    pub fn get(&self, hash: &Felt) -> Option<&ProofNode> {
        self.0.get(hash)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'txn, T: DbTx, H: StarkHash> Trie<'txn, T, H> {
    /// The proof-node sequence for `key`, from the root down to the leaf (or
    /// to the node where the path to an absent `key` diverges).
    pub fn get_proof(&self, key: &Felt) -> Result<Vec<ProofNode>, ProofError> {
        let key = felt_to_key(key);
        let nodes = self.nodes_from_root(&key)?;
        let mut proof = Vec::new();
        let mut parent: Option<TrieKey> = None;
        for snode in &nodes {
            match self.transform_node(parent.as_ref(), snode)? {
                (Some(edge), Some(binary)) => {
                    proof.push(edge);
                    proof.push(binary);
                }
                (None, Some(binary)) => proof.push(binary),
                (Some(edge), None) => proof.push(edge),
                // A leaf that is a direct binary child: the parent binary
                // already commits to its value.
                (None, None) => break,
            }
            parent = Some(snode.key);
        }
        Ok(proof)
    }

    // Projects one storage node into its (edge, binary) proof parts.
    fn transform_node(
        &self,
        parent: Option<&TrieKey>,
        snode: &StorageNode,
    ) -> Result<(Option<ProofNode>, Option<ProofNode>), ProofError> {
        let edge = is_edge(parent, &snode.key).then(|| ProofNode::Edge {
            child: snode.node.value,
            path: edge_path(&snode.key, parent),
        });
        if snode.key.len() == TRIE_HEIGHT {
            return Ok((edge, None));
        }
        let left_hash = self.child_hash(&snode.key, snode.node.left, snode.node.left_hash)?;
        let right_hash = self.child_hash(&snode.key, snode.node.right, snode.node.right_hash)?;
        Ok((edge, Some(ProofNode::Binary { left_hash, right_hash })))
    }
}

// Whether the step from `parent` down to a node stored under `key` crosses a
// non-trivial edge. The root is an edge whenever its key is non-empty.
fn is_edge(parent: Option<&TrieKey>, key: &TrieKey) -> bool {
    match parent {
        None => key.len() != 0,
        Some(parent) => key.len() - parent.len() > 1,
    }
}

/// Walks `proof_set` from `root` along `key` and returns the proven leaf
/// value. Zero is a valid answer: it proves non-membership.
pub fn verify_proof<H: StarkHash>(
    root: &Felt,
    key: &Felt,
    proof_set: &ProofSet,
) -> Result<Felt, ProofError> {
    if *root == Felt::ZERO {
        // The empty trie holds nothing.
        return Ok(Felt::ZERO);
    }
    let key = felt_to_key(key);
    let mut expected = *root;
    let mut remaining = key;
    loop {
        if remaining.is_empty() {
            return Ok(expected);
        }
        let Some(proof_node) = proof_set.get(&expected) else {
            return Err(ProofError::MissingProofNode(expected));
        };
        let computed = proof_node.hash::<H>();
        if computed != expected {
            return Err(ProofError::ProofNodeHashMismatch { expected, computed });
        }
        match proof_node {
            ProofNode::Binary { left_hash, right_hash } => {
                expected = if remaining.is_bit_set(remaining.len() - 1) {
                    *right_hash
                } else {
                    *left_hash
                };
                remaining.remove_most_significant_bit();
            }
            ProofNode::Edge { child, path } => {
                if path.len() > remaining.len()
                    || remaining.most_significant_bits(path.len())? != *path
                {
                    // The key leaves the proven path here; the trie holds
                    // nothing under it.
                    return Ok(Felt::ZERO);
                }
                expected = *child;
                let rest = remaining.len() - path.len();
                remaining.truncate(rest);
            }
        }
    }
}

/// Verifies that `keys`/`values` are exactly the trie's contents between the
/// boundary proofs. Without a proof set the pairs must rebuild the whole
/// trie. Keys must be strictly ascending, starting at or after `first_key`,
/// and no value may be zero.
pub fn verify_range_proof<H: StarkHash>(
    root: &Felt,
    first_key: &Felt,
    keys: &[Felt],
    values: &[Felt],
    proof_set: Option<&ProofSet>,
) -> Result<(), ProofError> {
    if keys.len() != values.len() {
        return Err(ProofError::KeyValueCountMismatch { keys: keys.len(), values: values.len() });
    }
    let Some(last_key) = keys.last() else {
        return Err(ProofError::Malformed("empty range"));
    };
    if first_key > &keys[0] || keys.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ProofError::NonMonotonicRange);
    }
    if values.iter().any(|value| *value == Felt::ZERO) {
        return Err(ProofError::DeletionInRange);
    }

    let store = MemDb::new();
    let mut trie: Trie<'_, MemDb, H> = Trie::new(&store, Vec::new())?;

    if let Some(proof_set) = proof_set {
        let mut left_path = proof_to_path::<H>(proof_set, &felt_to_key(first_key), root)?;
        let mut right_path = proof_to_path::<H>(proof_set, &felt_to_key(last_key), root)?;

        // The two skeletons describe the same nodes down to their first
        // divergence; graft each side's resolved child onto the other.
        for i in 0..left_path.len().min(right_path.len()) {
            if left_path[i].key != right_path[i].key {
                break;
            }
            let (right_child, right_child_hash) =
                (right_path[i].node.right, right_path[i].node.right_hash);
            let (left_child, left_child_hash) =
                (left_path[i].node.left, left_path[i].node.left_hash);
            left_path[i].node.right = right_child;
            left_path[i].node.right_hash = right_child_hash;
            right_path[i].node.left = left_child;
            right_path[i].node.left_hash = left_child_hash;
        }
        for snode in left_path {
            trie.put_inner(snode.key, snode.node);
        }
        for snode in right_path {
            trie.put_inner(snode.key, snode.node);
        }
    }

    for (key, value) in keys.iter().zip(values) {
        trie.put(key, value)?;
    }

    let computed = trie.root()?;
    if computed != *root {
        return Err(ProofError::RootMismatch { expected: *root, computed });
    }
    Ok(())
}

/// Rebuilds the ordered storage nodes along the path to `leaf_key` from a
/// proof set, fusing each Edge with the Binary it compresses into. Children
/// off the path keep a zero-length sentinel key (the proof cannot name
/// them); their subtree commitments survive in the cached child hashes.
pub fn proof_to_path<H: StarkHash>(
    proof_set: &ProofSet,
    leaf_key: &TrieKey,
    root: &Felt,
) -> Result<Vec<StorageNode>, ProofError> {
    let sentinel = TrieKey::default();
    let mut nodes: Vec<StorageNode> = Vec::new();
    let mut expected = *root;
    let mut consumed: u8 = 0;

    loop {
        if consumed == TRIE_HEIGHT {
            // The running hash is the leaf value itself: the last binary
            // pointed straight at the leaf.
            nodes.push(StorageNode { key: *leaf_key, node: Node::leaf(expected) });
            break;
        }
        let Some(proof_node) = proof_set.get(&expected) else {
            return Err(ProofError::MissingProofNode(expected));
        };
        let computed = proof_node.hash::<H>();
        if computed != expected {
            return Err(ProofError::ProofNodeHashMismatch { expected, computed });
        }

        match proof_node {
            ProofNode::Binary { left_hash, right_hash } => {
                let node_key = leaf_key.most_significant_bits(consumed)?;
                let bit = leaf_key.is_bit_set(TRIE_HEIGHT - consumed - 1);
                nodes.push(StorageNode {
                    key: node_key,
                    node: Node {
                        value: H::hash(left_hash, right_hash),
                        left: Some(sentinel),
                        right: Some(sentinel),
                        left_hash: Some(*left_hash),
                        right_hash: Some(*right_hash),
                    },
                });
                expected = if bit { *right_hash } else { *left_hash };
                consumed += 1;
            }
            ProofNode::Edge { child, path } => {
                if consumed + path.len() > TRIE_HEIGHT {
                    return Err(ProofError::Malformed("edge extends past the trie height"));
                }
                if !path_matches(leaf_key, consumed, path)? {
                    // The boundary key is absent; the skeleton ends at the
                    // last shared ancestor.
                    break;
                }
                if consumed + path.len() == TRIE_HEIGHT {
                    nodes.push(StorageNode { key: *leaf_key, node: Node::leaf(*child) });
                    break;
                }
                // A non-terminal edge always compresses into a binary node;
                // fuse the pair back into one storage node.
                let Some(inner) = proof_set.get(child) else {
                    return Err(ProofError::MissingProofNode(*child));
                };
                let ProofNode::Binary { left_hash, right_hash } = inner else {
                    return Err(ProofError::Malformed("edge does not lead to a binary node"));
                };
                let inner_hash = inner.hash::<H>();
                if inner_hash != *child {
                    return Err(ProofError::ProofNodeHashMismatch {
                        expected: *child,
                        computed: inner_hash,
                    });
                }
                consumed += path.len();
                let node_key = leaf_key.most_significant_bits(consumed)?;
                let bit = leaf_key.is_bit_set(TRIE_HEIGHT - consumed - 1);
                nodes.push(StorageNode {
                    key: node_key,
                    node: Node {
                        value: *child,
                        left: Some(sentinel),
                        right: Some(sentinel),
                        left_hash: Some(*left_hash),
                        right_hash: Some(*right_hash),
                    },
                });
                expected = if bit { *right_hash } else { *left_hash };
                consumed += 1;
            }
        }
    }

    // Second pass: point every node's on-path child at its successor.
    for i in 0..nodes.len().saturating_sub(1) {
        let child_key = nodes[i + 1].key;
        let parent_len = nodes[i].key.len();
        let bit = leaf_key.is_bit_set(TRIE_HEIGHT - parent_len - 1);
        if bit {
            nodes[i].node.right = Some(child_key);
        } else {
            nodes[i].node.left = Some(child_key);
        }
    }
    Ok(nodes)
}

// Whether the bits of `leaf_key` starting `consumed` bits below its top match
// `path`.
fn path_matches(leaf_key: &TrieKey, consumed: u8, path: &TrieKey) -> Result<bool, TrieError> {
    let mut window = leaf_key.most_significant_bits(consumed + path.len())?;
    window.truncate(path.len());
    Ok(window == *path)
}
