//! Path-compressed sparse binary Merkle trie of fixed height 251.
//!
//! Keys are 251-bit paths derived from field elements, values are field
//! elements, and the value zero means "absent". Internal nodes always have
//! two children; single-child runs are compressed into the gap between a
//! parent key and a child key (an implicit edge), so the stored shape is
//! leaves and binary nodes only. A node reached through a non-trivial edge
//! hashes as `H(value, path) + len`, a binary node as
//! `H(left_hash, right_hash)`, and a leaf as its stored value; the root of
//! an empty trie is zero.
//!
//! Mutations buffer in memory and hit the underlying transaction only on
//! [`Trie::commit`], which also maintains the root pointer. A trie instance
//! is owned by a single logical writer; nothing here is shared across
//! threads.

pub mod key;
pub mod node;
pub mod proof;
mod storage;

#[cfg(test)]
#[path = "trie_test.rs"]
mod trie_test;

use std::marker::PhantomData;

use indexmap::IndexMap;
use starknet_types_core::felt::Felt;
use starknet_types_core::hash::{Pedersen, Poseidon, StarkHash};
use tracing::trace;

use crate::db::{DbError, DbTx, DbTxMut};
use self::key::TrieKey;
use self::node::{edge_path, hash_with_path, Node, StorageNode};
use self::storage::TrieStorage;

/// Height of every trie in the system; keys are 251-bit field elements.
pub const TRIE_HEIGHT: u8 = 251;

#[derive(thiserror::Error, Debug)]
pub enum TrieError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Malformed trie node under key {0:?}.")]
    MalformedNode(TrieKey),
    #[error("Malformed trie root pointer.")]
    MalformedRootPointer,
    #[error("Trie node {0:?} is referenced by its parent but missing from storage.")]
    MissingNode(TrieKey),
    #[error("Internal node {0:?} is missing a child and carries no hash for it.")]
    MissingChildHash(TrieKey),
    #[error("Cannot take {requested} bits from a key of length {len}.")]
    KeyTooShort { len: u8, requested: u8 },
}

/// The 251-bit trie path of a field element.
pub fn felt_to_key(felt: &Felt) -> TrieKey {
    TrieKey::from_felt(felt, TRIE_HEIGHT)
}

/// The global storage trie and every per-contract trie hash with Pedersen.
pub type PedersenTrie<'txn, T> = Trie<'txn, T, Pedersen>;
/// The class-commitment trie hashes with Poseidon.
pub type PoseidonTrie<'txn, T> = Trie<'txn, T, Poseidon>;

pub struct Trie<'txn, T, H: StarkHash> {
    storage: TrieStorage<'txn, T>,
    root_key: Option<TrieKey>,
    stored_root_key: Option<TrieKey>,
    // Buffered mutations, flushed by commit. `None` marks a deletion.
    pending: IndexMap<TrieKey, Option<Node>>,
    _hash: PhantomData<H>,
}

impl<'txn, T: DbTx, H: StarkHash> Trie<'txn, T, H> {
    /// Opens the trie stored under `prefix`, reading its root pointer.
    pub fn new(txn: &'txn T, prefix: Vec<u8>) -> Result<Self, TrieError> {
        let storage = TrieStorage::new(txn, prefix);
        let root_key = storage.root_key()?;
        Ok(Trie {
            storage,
            root_key,
            stored_root_key: root_key,
            pending: IndexMap::new(),
            _hash: PhantomData,
        })
    }

    pub fn root_key(&self) -> Option<TrieKey> {
        self.root_key
    }

    /// The commitment of the whole trie; zero when empty.
    pub fn root(&self) -> Result<Felt, TrieError> {
        let Some(root_key) = self.root_key else {
            return Ok(Felt::ZERO);
        };
        let root = self.node(&root_key)?;
        Ok(root.hash::<H>(&edge_path(&root_key, None)))
    }

    /// The value stored under `key`, zero when absent.
    pub fn get(&self, key: &Felt) -> Result<Felt, TrieError> {
        let key = felt_to_key(key);
        let nodes = self.nodes_from_root(&key)?;
        match nodes.last() {
            Some(last) if last.key == key => Ok(last.node.value),
            _ => Ok(Felt::ZERO),
        }
    }

    /// The ordered list of storage nodes visited while descending from the
    /// root toward `key`, ending at the leaf, at the node whose edge diverges
    /// from `key`, or at the node whose relevant child is unresolved.
    pub fn nodes_from_root(&self, key: &TrieKey) -> Result<Vec<StorageNode>, TrieError> {
        let mut nodes = Vec::new();
        let Some(mut current) = self.root_key else {
            return Ok(nodes);
        };
        loop {
            let node = self.node(&current)?;
            let on_path = key.most_significant_bits(current.len())? == current;
            let next = if on_path && current.len() < TRIE_HEIGHT {
                let bit = key.is_bit_set(TRIE_HEIGHT - current.len() - 1);
                if bit { node.right } else { node.left }
            } else {
                None
            };
            nodes.push(StorageNode { key: current, node });
            match next {
                Some(child) if !child.is_empty() => current = child,
                _ => break,
            }
        }
        Ok(nodes)
    }

    /// Sets `key` to `value` and returns the previous value; a fresh insert
    /// reports `Some(0)`. Zero deletes. A write that changes nothing
    /// (absent-and-zero, or an identical value) returns `None`.
    pub fn put(&mut self, key: &Felt, value: &Felt) -> Result<Option<Felt>, TrieError> {
        let key = felt_to_key(key);
        let nodes = self.nodes_from_root(&key)?;

        let Some(last) = nodes.last() else {
            // Empty trie.
            if *value == Felt::ZERO {
                return Ok(None);
            }
            self.store(key, Node::leaf(*value));
            self.root_key = Some(key);
            return Ok(Some(Felt::ZERO));
        };

        if last.key == key {
            let old = last.node.value;
            if old == *value {
                return Ok(None);
            }
            if *value == Felt::ZERO {
                self.delete_leaf(&nodes)?;
                return Ok(Some(old));
            }
            self.store(key, Node::leaf(*value));
            self.refresh_path(&nodes[..nodes.len() - 1])?;
            return Ok(Some(old));
        }

        if *value == Felt::ZERO {
            // Deleting an absent key.
            return Ok(None);
        }

        if key.most_significant_bits(last.key.len())? == last.key {
            self.attach_leaf(&nodes, key, value)?;
        } else {
            self.split_edge(&nodes, key, value)?;
        }
        Ok(Some(Felt::ZERO))
    }

    /// Installs a reconstructed storage node verbatim; the shallowest node
    /// installed becomes the root. Only proof-skeleton rebuilding uses this.
    pub(crate) fn put_inner(&mut self, key: TrieKey, node: Node) {
        match self.root_key {
            Some(root_key) if root_key.len() <= key.len() => {}
            _ => self.root_key = Some(key),
        }
        self.store(key, node);
    }

    /// Writes every buffered node and the root pointer into the enclosing
    /// transaction.
    pub fn commit(&mut self) -> Result<(), TrieError>
    where
        T: DbTxMut,
    {
        trace!(nodes = self.pending.len(), "Committing trie nodes.");
        for (key, entry) in std::mem::take(&mut self.pending) {
            match entry {
                Some(node) => self.storage.put_node(&key, &node)?,
                None => self.storage.delete_node(&key)?,
            }
        }
        if self.root_key != self.stored_root_key {
            match self.root_key {
                Some(root_key) => self.storage.put_root_key(&root_key)?,
                None => self.storage.delete_root_key()?,
            }
            self.stored_root_key = self.root_key;
        }
        Ok(())
    }

    fn node(&self, key: &TrieKey) -> Result<Node, TrieError> {
        if let Some(entry) = self.pending.get(key) {
            return entry.clone().ok_or(TrieError::MissingNode(*key));
        }
        self.storage.node(key)?.ok_or(TrieError::MissingNode(*key))
    }

    fn store(&mut self, key: TrieKey, node: Node) {
        self.pending.insert(key, Some(node));
    }

    fn remove(&mut self, key: TrieKey) {
        self.pending.insert(key, None);
    }

    // The descent stopped at an internal node whose relevant child slot is
    // unresolved (a proof-skeleton node); hang the new leaf directly off it.
    fn attach_leaf(
        &mut self,
        nodes: &[StorageNode],
        key: TrieKey,
        value: &Felt,
    ) -> Result<(), TrieError> {
        let slot = &nodes[nodes.len() - 1];
        let mut parent = slot.node.clone();
        let bit = key.is_bit_set(TRIE_HEIGHT - slot.key.len() - 1);
        if bit {
            parent.right = Some(key);
            parent.right_hash = None;
        } else {
            parent.left = Some(key);
            parent.left_hash = None;
        }
        self.store(key, Node::leaf(*value));
        self.store(slot.key, parent);
        self.refresh_path(nodes)
    }

    // Splits the edge leading to the node where the descent diverged: a new
    // binary node at the longest common prefix takes the old subtree on one
    // side and the new leaf on the other.
    fn split_edge(
        &mut self,
        nodes: &[StorageNode],
        key: TrieKey,
        value: &Felt,
    ) -> Result<(), TrieError> {
        let diverged = &nodes[nodes.len() - 1];
        let common_len = key.common_prefix_len(&diverged.key);
        let branch_key = key.most_significant_bits(common_len)?;
        let new_leaf_right = key.is_bit_set(TRIE_HEIGHT - common_len - 1);

        self.store(key, Node::leaf(*value));
        let leaf_hash = hash_with_path::<H>(value, &edge_path(&key, Some(&branch_key)));
        let diverged_hash =
            diverged.node.hash::<H>(&edge_path(&diverged.key, Some(&branch_key)));
        let (left, right, left_hash, right_hash) = if new_leaf_right {
            (diverged.key, key, diverged_hash, leaf_hash)
        } else {
            (key, diverged.key, leaf_hash, diverged_hash)
        };
        let branch = Node {
            value: H::hash(&left_hash, &right_hash),
            left: Some(left),
            right: Some(right),
            left_hash: Some(left_hash),
            right_hash: Some(right_hash),
        };
        self.store(branch_key, branch);

        if nodes.len() == 1 {
            // The diverged node was the root.
            self.root_key = Some(branch_key);
            return Ok(());
        }
        let parent = &nodes[nodes.len() - 2];
        let mut parent_node = self.node(&parent.key)?;
        if parent_node.left == Some(diverged.key) {
            parent_node.left = Some(branch_key);
            parent_node.left_hash = None;
        } else {
            parent_node.right = Some(branch_key);
            parent_node.right_hash = None;
        }
        self.store(parent.key, parent_node);
        self.refresh_path(&nodes[..nodes.len() - 1])
    }

    // Removes the last node of `nodes` (a leaf) and fuses its now-unary
    // parent into the edge above: the grandparent points straight at the
    // sibling, whose own key already encodes its depth.
    fn delete_leaf(&mut self, nodes: &[StorageNode]) -> Result<(), TrieError> {
        let leaf = &nodes[nodes.len() - 1];
        self.remove(leaf.key);
        if nodes.len() == 1 {
            self.root_key = None;
            return Ok(());
        }

        let parent = &nodes[nodes.len() - 2];
        let sibling = if parent.node.left == Some(leaf.key) {
            parent.node.right
        } else {
            parent.node.left
        };
        let sibling = match sibling {
            Some(sibling) if !sibling.is_empty() => sibling,
            _ => return Err(TrieError::MalformedNode(parent.key)),
        };
        self.remove(parent.key);

        if nodes.len() == 2 {
            self.root_key = Some(sibling);
            return Ok(());
        }
        let grandparent = &nodes[nodes.len() - 3];
        let mut grandparent_node = self.node(&grandparent.key)?;
        if grandparent_node.left == Some(parent.key) {
            grandparent_node.left = Some(sibling);
            grandparent_node.left_hash = None;
        } else {
            grandparent_node.right = Some(sibling);
            grandparent_node.right_hash = None;
        }
        self.store(grandparent.key, grandparent_node);
        self.refresh_path(&nodes[..nodes.len() - 2])?;
        Ok(())
    }

    // Recomputes values and cached child hashes bottom-up along a chain of
    // ancestors of the mutated position.
    fn refresh_path(&mut self, chain: &[StorageNode]) -> Result<(), TrieError> {
        for ancestor in chain.iter().rev() {
            let mut node = self.node(&ancestor.key)?;
            let left_hash = self.child_hash(&ancestor.key, node.left, node.left_hash)?;
            let right_hash = self.child_hash(&ancestor.key, node.right, node.right_hash)?;
            node.value = H::hash(&left_hash, &right_hash);
            node.left_hash = Some(left_hash);
            node.right_hash = Some(right_hash);
            self.store(ancestor.key, node);
        }
        Ok(())
    }

    // The hash of a child as seen from `parent`. An unresolved child (absent
    // or zero-length key) keeps its cached hash: its subtree is untouched.
    pub(crate) fn child_hash(
        &self,
        parent: &TrieKey,
        child: Option<TrieKey>,
        cached: Option<Felt>,
    ) -> Result<Felt, TrieError> {
        let resolved = match child {
            Some(child) if !child.is_empty() => child,
            _ => return cached.ok_or(TrieError::MissingChildHash(*parent)),
        };
        let node = self.node(&resolved)?;
        Ok(node.hash::<H>(&edge_path(&resolved, Some(parent))))
    }
}
