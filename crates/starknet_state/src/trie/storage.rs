use crate::db::serialization::StorageSerdeEx;
use crate::db::{DbError, DbTx, DbTxMut};
use super::key::TrieKey;
use super::node::Node;
use super::TrieError;

/// A view of one trie's slice of the keyspace: nodes live under
/// `prefix ‖ encode(key)` and the root pointer under the bare prefix.
/// Absence of the root pointer means the trie is empty.
pub(crate) struct TrieStorage<'txn, T> {
    txn: &'txn T,
    prefix: Vec<u8>,
}

impl<'txn, T: DbTx> TrieStorage<'txn, T> {
    pub(crate) fn new(txn: &'txn T, prefix: Vec<u8>) -> Self {
        Self { txn, prefix }
    }

    fn node_db_key(&self, key: &TrieKey) -> Result<Vec<u8>, DbError> {
        let mut db_key = self.prefix.clone();
        db_key.extend_from_slice(&key.serialize()?);
        Ok(db_key)
    }

    pub(crate) fn node(&self, key: &TrieKey) -> Result<Option<Node>, TrieError> {
        let Some(bytes) = self.txn.get(&self.node_db_key(key)?)? else {
            return Ok(None);
        };
        let node =
            Node::deserialize(&mut bytes.as_slice()).ok_or(TrieError::MalformedNode(*key))?;
        Ok(Some(node))
    }

    pub(crate) fn root_key(&self) -> Result<Option<TrieKey>, TrieError> {
        let Some(bytes) = self.txn.get(&self.prefix)? else {
            return Ok(None);
        };
        let key = TrieKey::deserialize(&mut bytes.as_slice())
            .ok_or(TrieError::MalformedRootPointer)?;
        Ok(Some(key))
    }
}

impl<'txn, T: DbTxMut> TrieStorage<'txn, T> {
    pub(crate) fn put_node(&self, key: &TrieKey, node: &Node) -> Result<(), TrieError> {
        Ok(self.txn.set(&self.node_db_key(key)?, &node.serialize()?)?)
    }

    pub(crate) fn delete_node(&self, key: &TrieKey) -> Result<(), TrieError> {
        Ok(self.txn.delete(&self.node_db_key(key)?)?)
    }

    pub(crate) fn put_root_key(&self, key: &TrieKey) -> Result<(), TrieError> {
        Ok(self.txn.set(&self.prefix, &key.serialize()?)?)
    }

    pub(crate) fn delete_root_key(&self) -> Result<(), TrieError> {
        Ok(self.txn.delete(&self.prefix)?)
    }
}
