//! Per-contract state: the persisted record and the contract's storage trie.

#[cfg(test)]
#[path = "contract_test.rs"]
mod contract_test;

use indexmap::IndexMap;
use starknet_types_core::felt::Felt;
use starknet_types_core::hash::{Pedersen, StarkHash};

use crate::db::serialization::{StorageSerde, StorageSerdeError, StorageSerdeEx};
use crate::db::{Bucket, DbError, DbTx, DbTxMut};
use crate::trie::{PedersenTrie, Trie, TrieError};
use super::history;
use super::{StateError, StateResult};

/// A deployed contract's state: its record plus an in-memory overlay of
/// pending storage writes. The overlay is flushed into the contract's
/// storage trie on [`ContractState::commit`].
///
/// The persisted record holds only the class hash, the nonce and the deploy
/// height; the address is the record's database key.
#[derive(Debug)]
pub struct ContractState {
    pub address: Felt,
    pub class_hash: Felt,
    pub nonce: Felt,
    pub deploy_height: u64,
    pub(crate) dirty_storage: IndexMap<Felt, Felt>,
}

impl ContractState {
    pub fn new(address: Felt, class_hash: Felt, nonce: Felt, deploy_height: u64) -> Self {
        ContractState { address, class_hash, nonce, deploy_height, dirty_storage: IndexMap::new() }
    }

    /// Loads the record stored for `address`; `ContractNotDeployed` when
    /// there is none.
    pub fn get<T: DbTx>(address: &Felt, txn: &T) -> StateResult<Self> {
        let bytes = txn
            .get(&contract_db_key(address))?
            .ok_or(StateError::ContractNotDeployed { address: *address })?;
        let mut contract = ContractState::deserialize(&mut bytes.as_slice())
            .ok_or(DbError::InnerDeserialization)
            .map_err(StateError::from)?;
        contract.address = *address;
        Ok(contract)
    }

    pub fn exists<T: DbTx>(address: &Felt, txn: &T) -> StateResult<bool> {
        Ok(txn.get(&contract_db_key(address))?.is_some())
    }

    /// The contract's storage trie, rooted under its own bucket prefix.
    pub fn storage_trie<'txn, T: DbTx>(
        address: &Felt,
        txn: &'txn T,
    ) -> Result<PedersenTrie<'txn, T>, TrieError> {
        Trie::new(txn, Bucket::ContractStorage.key(&[address.to_bytes_be().as_slice()]))
    }

    pub fn storage_root<T: DbTx>(&self, txn: &T) -> StateResult<Felt> {
        Ok(Self::storage_trie(&self.address, txn)?.root()?)
    }

    /// Buffers a storage write; nothing is persisted until `commit`.
    pub fn update_storage(&mut self, key: Felt, value: Felt) {
        self.dirty_storage.insert(key, value);
    }

    /// Reads a storage location, preferring the pending overlay.
    pub fn get_storage<T: DbTx>(&self, key: &Felt, txn: &T) -> StateResult<Felt> {
        if let Some(value) = self.dirty_storage.get(key) {
            return Ok(*value);
        }
        Ok(Self::storage_trie(&self.address, txn)?.get(key)?)
    }

    /// Flushes the overlay through the storage trie, logging each replaced
    /// value when `log_changes`, and persists the record. Writes that change
    /// nothing produce no log entry.
    pub fn commit<T: DbTxMut>(
        &mut self,
        txn: &T,
        log_changes: bool,
        block_number: u64,
    ) -> StateResult<()> {
        let mut storage_trie = Self::storage_trie(&self.address, txn)?;
        for (key, value) in std::mem::take(&mut self.dirty_storage) {
            let old_value = storage_trie.put(&key, &value)?;
            if let Some(old_value) = old_value {
                if log_changes {
                    history::log_old_value(
                        txn,
                        &history::storage_log_key(&self.address, &key),
                        &old_value,
                        block_number,
                    )?;
                }
            }
        }
        storage_trie.commit()?;
        txn.set(&contract_db_key(&self.address), &self.serialize()?)?;
        Ok(())
    }

    /// Deletes the record. The storage-trie keys are removed separately by
    /// the reverse diff during revert.
    pub fn purge<T: DbTxMut>(&self, txn: &T) -> StateResult<()> {
        txn.delete(&contract_db_key(&self.address))?;
        Ok(())
    }

    /// The contract's leaf in the global storage trie.
    pub fn commitment<T: DbTx>(&self, txn: &T) -> StateResult<Felt> {
        let storage_root = self.storage_root(txn)?;
        Ok(calculate_contract_commitment(&storage_root, &self.class_hash, &self.nonce))
    }
}

pub(crate) fn contract_db_key(address: &Felt) -> Vec<u8> {
    Bucket::Contract.key(&[address.to_bytes_be().as_slice()])
}

/// `H(H(H(class_hash, storage_root), nonce), 0)`.
pub(crate) fn calculate_contract_commitment(
    storage_root: &Felt,
    class_hash: &Felt,
    nonce: &Felt,
) -> Felt {
    Pedersen::hash(
        &Pedersen::hash(&Pedersen::hash(class_hash, storage_root), nonce),
        &Felt::ZERO,
    )
}

/// The address of a contract deployed by `caller_address` with the given
/// salt, class and constructor calldata.
pub fn calculate_contract_address(
    caller_address: &Felt,
    class_hash: &Felt,
    salt: &Felt,
    constructor_calldata: &[Felt],
) -> Felt {
    let prefix = Felt::from_bytes_be_slice(b"STARKNET_CONTRACT_ADDRESS");
    let calldata_hash = Pedersen::hash_array(constructor_calldata);
    Pedersen::hash_array(&[prefix, *caller_address, *salt, *class_hash, calldata_hash])
}

// The address and the overlay are not part of the persisted form.
impl StorageSerde for ContractState {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        self.class_hash.serialize_into(res)?;
        self.nonce.serialize_into(res)?;
        self.deploy_height.serialize_into(res)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        Some(ContractState {
            address: Felt::ZERO,
            class_hash: Felt::deserialize_from(bytes)?,
            nonce: Felt::deserialize_from(bytes)?,
            deploy_height: u64::deserialize_from(bytes)?,
            dirty_storage: IndexMap::new(),
        })
    }
}
