use starknet_types_core::felt::Felt;
use starknet_types_core::hash::StarkHash;

use crate::db::serialization::{StorageSerde, StorageSerdeError};
use super::key::TrieKey;

/// A stored trie node.
///
/// `value` is the node's own hash in the commitment tree: the stored felt for
/// a leaf, `H(left_hash, right_hash)` for an internal node. `left` and
/// `right` are the storage keys of the children; path compression means a
/// child key may be more than one bit longer than this node's key, the gap
/// being an implicit edge. The cached child hashes are the children's hashes
/// as seen from this node (edge adjustment included); for reconstructed
/// proof skeletons whose children are unresolved they are the only source of
/// the off-path subtree commitments.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Node {
    pub value: Felt,
    pub left: Option<TrieKey>,
    pub right: Option<TrieKey>,
    pub left_hash: Option<Felt>,
    pub right_hash: Option<Felt>,
}

impl Node {
    pub fn leaf(value: Felt) -> Self {
        Node { value, ..Default::default() }
    }

    /// Hash of this node as seen through the edge `path` from its parent.
    pub fn hash<H: StarkHash>(&self, path: &TrieKey) -> Felt {
        hash_with_path::<H>(&self.value, path)
    }
}

/// The edge hash rule: `H(child, path) + len`, with the length occupying the
/// least significant byte of the length felt. A zero-length path contributes
/// nothing and the child hash passes through.
pub(crate) fn hash_with_path<H: StarkHash>(value: &Felt, path: &TrieKey) -> Felt {
    if path.is_empty() {
        return *value;
    }
    H::hash(value, &path.felt()) + Felt::from(path.len())
}

/// The edge bits between `parent` and a child stored under `key`: the child
/// key without the parent prefix and without the direction bit. The root has
/// no parent and its edge is the entire root key.
pub(crate) fn edge_path(key: &TrieKey, parent: Option<&TrieKey>) -> TrieKey {
    let mut path = *key;
    if let Some(parent) = parent {
        path.truncate(key.len() - parent.len() - 1);
    }
    path
}

/// A node together with the key it is stored under.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageNode {
    pub key: TrieKey,
    pub node: Node,
}

impl StorageSerde for Node {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        self.value.serialize_into(res)?;
        self.left.serialize_into(res)?;
        self.right.serialize_into(res)?;
        self.left_hash.serialize_into(res)?;
        self.right_hash.serialize_into(res)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        Some(Self {
            value: Felt::deserialize_from(bytes)?,
            left: Option::deserialize_from(bytes)?,
            right: Option::deserialize_from(bytes)?,
            left_hash: Option::deserialize_from(bytes)?,
            right_hash: Option::deserialize_from(bytes)?,
        })
    }
}
