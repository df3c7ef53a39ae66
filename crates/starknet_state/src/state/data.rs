use indexmap::IndexMap;
use starknet_types_core::felt::Felt;

use crate::db::serialization::{StorageSerde, StorageSerdeError};

// Diff maps are IndexMaps so that a replayed update touches the database in
// the same order it did the first time.

/// A state transition between two commitments, as delivered by the sync
/// driver.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StateUpdate {
    pub old_root: Felt,
    pub new_root: Felt,
    pub state_diff: StateDiff,
}

/// The difference a single block makes to the world state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StateDiff {
    /// Contract address to class hash.
    pub deployed_contracts: IndexMap<Felt, Felt>,
    /// Hashes of the declared Cairo 0 classes.
    pub declared_v0_classes: Vec<Felt>,
    /// Class hash to compiled class hash.
    pub declared_v1_classes: IndexMap<Felt, Felt>,
    /// Contract address to its new class hash.
    pub replaced_classes: IndexMap<Felt, Felt>,
    /// Contract address to its new nonce.
    pub nonces: IndexMap<Felt, Felt>,
    /// Contract address to storage-location updates.
    pub storage_diffs: IndexMap<Felt, IndexMap<Felt, Felt>>,
}

/// An opaque class definition. Only V1 (Sierra) classes participate in the
/// class-commitment trie.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Class {
    V0(Vec<u8>),
    V1(Vec<u8>),
}

impl Class {
    pub fn version(&self) -> u8 {
        match self {
            Class::V0(_) => 0,
            Class::V1(_) => 1,
        }
    }
}

/// A class definition together with the block at which it was declared.
/// Declarations are immutable: re-declaring keeps the earlier block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeclaredClass {
    pub declared_at: u64,
    pub class: Class,
}

impl StorageSerde for Class {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        match self {
            Class::V0(definition) => {
                0u8.serialize_into(res)?;
                definition.serialize_into(res)
            }
            Class::V1(definition) => {
                1u8.serialize_into(res)?;
                definition.serialize_into(res)
            }
        }
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        match u8::deserialize_from(bytes)? {
            0 => Some(Class::V0(Vec::deserialize_from(bytes)?)),
            1 => Some(Class::V1(Vec::deserialize_from(bytes)?)),
            _ => None,
        }
    }
}

impl StorageSerde for DeclaredClass {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        self.declared_at.serialize_into(res)?;
        self.class.serialize_into(res)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        Some(Self {
            declared_at: u64::deserialize_from(bytes)?,
            class: Class::deserialize_from(bytes)?,
        })
    }
}
