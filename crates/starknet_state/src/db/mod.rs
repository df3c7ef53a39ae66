//! Transactional key-value layer underneath the state database.
//!
//! The state core only ever talks to the two traits defined here: [`DbTx`]
//! for reads and ordered iteration and [`DbTxMut`] for writes. The canonical
//! backend is libmdbx ([`mdbx`]); [`memory`] provides the same surface over a
//! `BTreeMap` for tests and for the throwaway tries built while verifying
//! range proofs.
//!
//! Assumptions:
//! - The database is transactional with full ACID semantics.
//! - Keys are ordered lexicographically over their raw bytes and range
//!   lookups are supported.


pub mod mdbx;
pub mod memory;
pub mod serialization;

use std::result;

/// An error that can occur when interacting with the database.
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// An error that occurred in the database library.
    #[error(transparent)]
    Inner(#[from] libmdbx::Error),
    /// An error that occurred during deserialization.
    #[error("Deserialization failed.")]
    InnerDeserialization,
    /// An error that occurred during serialization.
    #[error("Serialization failed.")]
    Serialization,
}

pub type DbResult<V> = result::Result<V, DbError>;

/// One-byte prefixes partitioning the flat key namespace.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Bucket {
    /// Serialized contract record, keyed by contract address.
    Contract = 0,
    /// Per-contract storage-trie nodes, keyed by contract address.
    ContractStorage = 1,
    /// Declared class definitions, keyed by class hash.
    Class = 2,
    /// Global storage-trie nodes and root pointer.
    StateTrie = 3,
    /// Class-commitment-trie nodes and root pointer.
    ClassesTrie = 4,
    /// Old storage values, keyed by address, location and block number.
    ContractStorageHistory = 5,
    /// Old nonces, keyed by address and block number.
    ContractNonceHistory = 6,
    /// Old class hashes, keyed by address and block number.
    ContractClassHashHistory = 7,
}

impl Bucket {
    /// A database key inside this bucket, made of the bucket byte followed by
    /// the given segments.
    pub fn key(&self, segments: &[&[u8]]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + segments.iter().map(|s| s.len()).sum::<usize>());
        key.push(*self as u8);
        for segment in segments {
            key.extend_from_slice(segment);
        }
        key
    }
}

/// An ordered iterator over the raw keyspace. Dropping the cursor releases it;
/// cursors never outlive their transaction.
pub trait DbCursor {
    /// Positions the cursor at the first entry whose key is >= `key` and
    /// returns it.
    fn lower_bound(&mut self, key: &[u8]) -> DbResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Advances to the following entry and returns it.
    fn next(&mut self) -> DbResult<Option<(Vec<u8>, Vec<u8>)>>;
}

/// Read access to a transaction snapshot.
pub trait DbTx {
    type Cursor<'a>: DbCursor
    where
        Self: 'a;

    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    fn cursor(&self) -> DbResult<Self::Cursor<'_>>;
}

/// Write access on top of [`DbTx`]. All mutations are buffered in the
/// transaction and become visible atomically on commit.
pub trait DbTxMut: DbTx {
    fn set(&self, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Deletes the entry under `key`; deleting an absent key is a no-op.
    fn delete(&self, key: &[u8]) -> DbResult<()>;
}
