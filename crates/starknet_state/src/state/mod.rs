//! The state engine.
//!
//! Composes the two global tries (the Pedersen storage trie of per-contract
//! commitments and the Poseidon class-commitment trie) and applies atomic
//! state updates on top of a single KV transaction. Every mutation of a
//! per-contract field leaves its previous value in the change log, which
//! serves both point-in-time reads and [`State::revert`].
//!
//! The sync driver serialises calls to [`State::update`] and
//! [`State::revert`]; nothing here is shared across threads. On any error
//! the caller must abort the enclosing transaction; the engine never
//! repairs partially applied work.

pub mod contract;
pub mod data;
mod history;


use indexmap::map::Entry;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use starknet_types_core::felt::Felt;
use starknet_types_core::hash::{Poseidon, StarkHash};
use tracing::debug;

use crate::db::serialization::StorageSerdeEx;
use crate::db::{Bucket, DbError, DbTx, DbTxMut};
use crate::trie::{PedersenTrie, PoseidonTrie, Trie, TrieError};
use self::contract::ContractState;
use self::data::{Class, DeclaredClass, StateDiff, StateUpdate};

lazy_static! {
    /// Version tag mixed into the state commitment.
    static ref STATE_VERSION: Felt = Felt::from_bytes_be_slice(b"STARKNET_STATE_V0");
    /// Version tag of class-commitment leaves.
    static ref LEAF_VERSION: Felt = Felt::from_bytes_be_slice(b"CONTRACT_CLASS_LEAF_V0");
    /// Contracts that exist without a class (their class hash is zero) and
    /// are materialised on their first storage write.
    static ref NO_CLASS_CONTRACTS: [Felt; 1] = [Felt::ONE];
}

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error("Contract {address:#x} is not deployed.")]
    ContractNotDeployed { address: Felt },
    #[error("Contract {address:#x} is already deployed.")]
    ContractAlreadyDeployed { address: Felt },
    #[error("Class {class_hash:#x} is not declared.")]
    ClassNotFound { class_hash: Felt },
    #[error("State root {found:#x} does not match the expected root {expected:#x}.")]
    RootMismatch { expected: Felt, found: Felt },
    #[error("No change logged after the requested block; the head state holds the value.")]
    CheckHeadState,
}

pub type StateResult<V> = std::result::Result<V, StateError>;

/// Read access to the head state.
pub trait StateReader {
    fn contract_class_hash(&self, address: &Felt) -> StateResult<Felt>;
    fn contract_nonce(&self, address: &Felt) -> StateResult<Felt>;
    fn contract_storage(&self, address: &Felt, key: &Felt) -> StateResult<Felt>;
    fn class(&self, class_hash: &Felt) -> StateResult<DeclaredClass>;
}

/// The world state within one transaction's scope.
pub struct State<'txn, T> {
    txn: &'txn T,
}

impl<'txn, T: DbTx> State<'txn, T> {
    pub fn new(txn: &'txn T) -> Self {
        State { txn }
    }

    /// The state commitment binding the whole world state: the storage root
    /// alone while no class is declared, the versioned Poseidon composition
    /// afterwards.
    pub fn root(&self) -> StateResult<Felt> {
        let storage_root = self.storage_trie()?.root()?;
        let classes_root = self.classes_trie()?.root()?;
        if classes_root == Felt::ZERO {
            return Ok(storage_root);
        }
        Ok(Poseidon::hash_array(&[*STATE_VERSION, storage_root, classes_root]))
    }

    /// The declared class stored for `class_hash`.
    pub fn declared_class(&self, class_hash: &Felt) -> StateResult<DeclaredClass> {
        let bytes = self
            .txn
            .get(&class_db_key(class_hash))?
            .ok_or(StateError::ClassNotFound { class_hash: *class_hash })?;
        DeclaredClass::deserialize(&mut bytes.as_slice())
            .ok_or(DbError::InnerDeserialization)
            .map_err(StateError::from)
    }

    /// The value of `key` in the contract's storage at the end of block
    /// `block_number`.
    pub fn contract_storage_at(
        &self,
        address: &Felt,
        key: &Felt,
        block_number: u64,
    ) -> StateResult<Felt> {
        match history::value_at(self.txn, &history::storage_log_key(address, key), block_number) {
            Err(StateError::CheckHeadState) => self.contract_storage(address, key),
            result => result,
        }
    }

    /// The contract's nonce at the end of block `block_number`.
    pub fn contract_nonce_at(&self, address: &Felt, block_number: u64) -> StateResult<Felt> {
        match history::value_at(self.txn, &history::nonce_log_key(address), block_number) {
            Err(StateError::CheckHeadState) => self.contract_nonce(address),
            result => result,
        }
    }

    /// The contract's class hash at the end of block `block_number`.
    pub fn contract_class_hash_at(&self, address: &Felt, block_number: u64) -> StateResult<Felt> {
        match history::value_at(self.txn, &history::class_hash_log_key(address), block_number) {
            Err(StateError::CheckHeadState) => self.contract_class_hash(address),
            result => result,
        }
    }

    /// Whether the contract existed at the end of block `block_number`.
    pub fn contract_is_deployed_at(&self, address: &Felt, block_number: u64) -> StateResult<bool> {
        match ContractState::get(address, self.txn) {
            Ok(contract) => Ok(contract.deploy_height <= block_number),
            Err(StateError::ContractNotDeployed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn storage_trie(&self) -> Result<PedersenTrie<'txn, T>, TrieError> {
        Trie::new(self.txn, Bucket::StateTrie.key(&[]))
    }

    fn classes_trie(&self) -> Result<PoseidonTrie<'txn, T>, TrieError> {
        Trie::new(self.txn, Bucket::ClassesTrie.key(&[]))
    }

    fn verify_root(&self, expected: &Felt) -> StateResult<()> {
        let found = self.root()?;
        if found != *expected {
            return Err(StateError::RootMismatch { expected: *expected, found });
        }
        Ok(())
    }
}

impl<'txn, T: DbTx> StateReader for State<'txn, T> {
    fn contract_class_hash(&self, address: &Felt) -> StateResult<Felt> {
        Ok(ContractState::get(address, self.txn)?.class_hash)
    }

    fn contract_nonce(&self, address: &Felt) -> StateResult<Felt> {
        Ok(ContractState::get(address, self.txn)?.nonce)
    }

    fn contract_storage(&self, address: &Felt, key: &Felt) -> StateResult<Felt> {
        ContractState::get(address, self.txn)?.get_storage(key, self.txn)
    }

    fn class(&self, class_hash: &Felt) -> StateResult<DeclaredClass> {
        self.declared_class(class_hash)
    }
}

impl<'txn, T: DbTxMut> State<'txn, T> {
    /// Applies `update` for block `block_number`.
    ///
    /// The state's current root must equal `update.old_root` and the root
    /// after the update must equal `update.new_root`; on any failure,
    /// including a root mismatch, the caller must abort the enclosing
    /// transaction.
    pub fn update(
        &mut self,
        block_number: u64,
        update: &StateUpdate,
        declared_classes: &IndexMap<Felt, Class>,
    ) -> StateResult<()> {
        debug!(block_number, "Applying state update.");
        self.verify_root(&update.old_root)?;

        // Classes mentioned by the diff get persisted first so the class
        // leaves and the contract diffs below can rely on them.
        for (class_hash, class) in declared_classes {
            self.put_class(class_hash, class, block_number)?;
        }
        self.update_declared_classes_trie(
            &update.state_diff.declared_v1_classes,
            declared_classes,
        )?;

        let mut storage_trie = self.storage_trie()?;

        let mut contracts: IndexMap<Felt, ContractState> = IndexMap::new();
        for (address, class_hash) in &update.state_diff.deployed_contracts {
            if ContractState::exists(address, self.txn)? {
                return Err(StateError::ContractAlreadyDeployed { address: *address });
            }
            contracts
                .insert(*address, ContractState::new(*address, *class_hash, Felt::ZERO, block_number));
        }

        self.update_contracts(block_number, &update.state_diff, true, &mut contracts)?;

        for contract in contracts.values_mut() {
            contract.commit(self.txn, true, block_number)?;
            let commitment = contract.commitment(self.txn)?;
            storage_trie.put(&contract.address, &commitment)?;
        }
        storage_trie.commit()?;

        self.verify_root(&update.new_root)
    }

    /// Rolls the state back across `update`, which must be the update that
    /// produced the current root.
    pub fn revert(&mut self, block_number: u64, update: &StateUpdate) -> StateResult<()> {
        debug!(block_number, "Reverting state update.");
        self.verify_root(&update.new_root)?;

        self.remove_declared_classes(
            block_number,
            &update.state_diff.declared_v0_classes,
            &update.state_diff.declared_v1_classes,
        )?;

        let reversed = self.build_reverse_diff(block_number, &update.state_diff)?;

        let mut storage_trie = self.storage_trie()?;
        let mut contracts: IndexMap<Felt, ContractState> = IndexMap::new();
        self.update_contracts(block_number, &reversed, false, &mut contracts)?;
        for contract in contracts.values_mut() {
            contract.commit(self.txn, false, block_number)?;
            let commitment = contract.commitment(self.txn)?;
            storage_trie.put(&contract.address, &commitment)?;
        }

        // Deployments and emptied no-class contracts come out inside the same
        // trie-commit scope, so a single root transition is observable.
        for address in update.state_diff.deployed_contracts.keys() {
            self.purge_contract(&mut storage_trie, address)?;
        }
        for address in NO_CLASS_CONTRACTS.iter() {
            let contract = match ContractState::get(address, self.txn) {
                Ok(contract) => contract,
                Err(StateError::ContractNotDeployed { .. }) => continue,
                Err(err) => return Err(err),
            };
            if contract.storage_root(self.txn)? == Felt::ZERO {
                self.purge_contract(&mut storage_trie, address)?;
            }
        }
        storage_trie.commit()?;

        self.verify_root(&update.old_root)
    }

    // Applies the replaced-class, nonce and storage parts of `diff` to the
    // in-memory contract records, logging each field's previous value when
    // `log_changes`.
    fn update_contracts(
        &self,
        block_number: u64,
        diff: &StateDiff,
        log_changes: bool,
        contracts: &mut IndexMap<Felt, ContractState>,
    ) -> StateResult<()> {
        for (address, class_hash) in &diff.replaced_classes {
            let contract = self.load_contract(contracts, address)?;
            if log_changes {
                history::log_old_value(
                    self.txn,
                    &history::class_hash_log_key(address),
                    &contract.class_hash,
                    block_number,
                )?;
            }
            contract.class_hash = *class_hash;
        }

        for (address, nonce) in &diff.nonces {
            let contract = self.load_contract(contracts, address)?;
            if log_changes {
                history::log_old_value(
                    self.txn,
                    &history::nonce_log_key(address),
                    &contract.nonce,
                    block_number,
                )?;
            }
            contract.nonce = *nonce;
        }

        for (address, entries) in &diff.storage_diffs {
            let contract = self.load_contract_for_storage(contracts, address, block_number)?;
            for (key, value) in entries {
                contract.update_storage(*key, *value);
            }
        }
        Ok(())
    }

    fn load_contract<'c>(
        &self,
        contracts: &'c mut IndexMap<Felt, ContractState>,
        address: &Felt,
    ) -> StateResult<&'c mut ContractState> {
        match contracts.entry(*address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(ContractState::get(address, self.txn)?)),
        }
    }

    // Storage diffs may target a no-class contract before anything deployed
    // it; materialise it on the spot.
    fn load_contract_for_storage<'c>(
        &self,
        contracts: &'c mut IndexMap<Felt, ContractState>,
        address: &Felt,
        block_number: u64,
    ) -> StateResult<&'c mut ContractState> {
        match contracts.entry(*address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => match ContractState::get(address, self.txn) {
                Ok(contract) => Ok(entry.insert(contract)),
                Err(StateError::ContractNotDeployed { .. })
                    if NO_CLASS_CONTRACTS.contains(address) =>
                {
                    Ok(entry.insert(ContractState::new(
                        *address,
                        Felt::ZERO,
                        Felt::ZERO,
                        block_number,
                    )))
                }
                Err(err) => Err(err),
            },
        }
    }

    // Idempotent: a class re-declared at a later block keeps its first
    // declaration block.
    fn put_class(&self, class_hash: &Felt, class: &Class, declared_at: u64) -> StateResult<()> {
        let key = class_db_key(class_hash);
        if self.txn.get(&key)?.is_some() {
            return Ok(());
        }
        let declared = DeclaredClass { declared_at, class: class.clone() };
        self.txn.set(&key, &declared.serialize()?)?;
        Ok(())
    }

    fn update_declared_classes_trie(
        &self,
        declared_v1_classes: &IndexMap<Felt, Felt>,
        definitions: &IndexMap<Felt, Class>,
    ) -> StateResult<()> {
        let mut classes_trie = self.classes_trie()?;
        for (class_hash, compiled_class_hash) in declared_v1_classes {
            if !definitions.contains_key(class_hash) {
                continue;
            }
            let leaf = Poseidon::hash(&LEAF_VERSION, compiled_class_hash);
            classes_trie.put(class_hash, &leaf)?;
        }
        classes_trie.commit()?;
        Ok(())
    }

    // Drops the class records declared at `block_number`; a V1 class also
    // zeroes its leaf in the classes trie.
    fn remove_declared_classes(
        &self,
        block_number: u64,
        v0_classes: &[Felt],
        v1_classes: &IndexMap<Felt, Felt>,
    ) -> StateResult<()> {
        let mut classes_trie = self.classes_trie()?;
        for class_hash in v0_classes.iter().chain(v1_classes.keys()) {
            let declared = self.declared_class(class_hash)?;
            if declared.declared_at != block_number {
                continue;
            }
            self.txn.delete(&class_db_key(class_hash))?;
            if declared.class.version() == 1 {
                classes_trie.put(class_hash, &Felt::ZERO)?;
            }
        }
        classes_trie.commit()?;
        Ok(())
    }

    fn purge_contract(
        &self,
        storage_trie: &mut PedersenTrie<'txn, T>,
        address: &Felt,
    ) -> StateResult<()> {
        let contract = ContractState::get(address, self.txn)?;
        storage_trie.put(&contract.address, &Felt::ZERO)?;
        contract.purge(self.txn)?;
        Ok(())
    }

    // For every field `diff` touched, the value it held at the end of
    // `block_number - 1`, with the block's change-log entries deleted along
    // the way.
    fn build_reverse_diff(&self, block_number: u64, diff: &StateDiff) -> StateResult<StateDiff> {
        let mut reversed = diff.clone();

        reversed.storage_diffs = IndexMap::with_capacity(diff.storage_diffs.len());
        for (address, entries) in &diff.storage_diffs {
            let mut reversed_entries = IndexMap::with_capacity(entries.len());
            for key in entries.keys() {
                let old_value = if block_number == 0 {
                    Felt::ZERO
                } else {
                    self.contract_storage_at(address, key, block_number - 1)?
                };
                history::delete_log(
                    self.txn,
                    &history::storage_log_key(address, key),
                    block_number,
                )?;
                reversed_entries.insert(*key, old_value);
            }
            reversed.storage_diffs.insert(*address, reversed_entries);
        }

        reversed.nonces = IndexMap::with_capacity(diff.nonces.len());
        for address in diff.nonces.keys() {
            let old_nonce = if block_number == 0 {
                Felt::ZERO
            } else {
                self.contract_nonce_at(address, block_number - 1)?
            };
            history::delete_log(self.txn, &history::nonce_log_key(address), block_number)?;
            reversed.nonces.insert(*address, old_nonce);
        }

        reversed.replaced_classes = IndexMap::with_capacity(diff.replaced_classes.len());
        for address in diff.replaced_classes.keys() {
            let old_class_hash = if block_number == 0 {
                Felt::ZERO
            } else {
                self.contract_class_hash_at(address, block_number - 1)?
            };
            history::delete_log(self.txn, &history::class_hash_log_key(address), block_number)?;
            reversed.replaced_classes.insert(*address, old_class_hash);
        }

        Ok(reversed)
    }
}

fn class_db_key(class_hash: &Felt) -> Vec<u8> {
    Bucket::Class.key(&[class_hash.to_bytes_be().as_slice()])
}
