//! A storage implementation for a [`Starknet`] node's world state.
//!
//! This crate maintains the cryptographically authenticated state of a
//! Starknet chain: a Pedersen-hashed Merkle-Patricia trie of per-contract
//! commitments, a Poseidon-hashed trie of declared classes, and the change
//! logs needed to read the state at any prior block and to roll it back
//! after a reorg. The sync driver feeds it an ordered stream of state
//! updates; everything runs inside a single KV transaction supplied by the
//! caller, backed by [`libmdbx`].
//!
//! # Quick Start
//!
//! ```
//! use starknet_state::db::memory::MemDb;
//! use starknet_state::state::State;
//! use starknet_types_core::felt::Felt;
//!
//! let txn = MemDb::new();
//! let state = State::new(&txn);
//! assert_eq!(state.root().unwrap(), Felt::ZERO);   // Genesis.
//! ```
//!
//! On top of mdbx, open an environment with [`db::mdbx::open_env`], begin a
//! RW transaction and hand it to [`state::State`]; commit the transaction
//! once an update went through, or drop it to abort.
//!
//! [`Starknet`]: https://starknet.io/
//! [`libmdbx`]: https://docs.rs/libmdbx/latest/libmdbx/

pub mod db;
pub mod state;
pub mod trie;

pub use state::{State, StateError, StateReader, StateResult};
