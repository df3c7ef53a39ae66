//! The change log: for every mutated per-contract field at block `b`, an
//! entry `<field key> ‖ big-endian(b)` holding the field's previous value.
//! Point-in-time reads seek forward from `b` and the big-endian suffix keeps
//! entries of one field adjacent and height-ordered.

use byteorder::{BigEndian, ByteOrder};
use starknet_types_core::felt::Felt;

use crate::db::{Bucket, DbCursor, DbTx, DbTxMut};
use super::{StateError, StateResult};

pub(crate) fn storage_log_key(address: &Felt, location: &Felt) -> Vec<u8> {
    Bucket::ContractStorageHistory
        .key(&[address.to_bytes_be().as_slice(), location.to_bytes_be().as_slice()])
}

pub(crate) fn nonce_log_key(address: &Felt) -> Vec<u8> {
    Bucket::ContractNonceHistory.key(&[address.to_bytes_be().as_slice()])
}

pub(crate) fn class_hash_log_key(address: &Felt) -> Vec<u8> {
    Bucket::ContractClassHashHistory.key(&[address.to_bytes_be().as_slice()])
}

fn log_db_key(field_key: &[u8], block_number: u64) -> Vec<u8> {
    let mut key = field_key.to_vec();
    key.extend_from_slice(&block_number.to_be_bytes());
    key
}

pub(crate) fn log_old_value<T: DbTxMut>(
    txn: &T,
    field_key: &[u8],
    old_value: &Felt,
    block_number: u64,
) -> StateResult<()> {
    txn.set(&log_db_key(field_key, block_number), &old_value.to_bytes_be())?;
    Ok(())
}

pub(crate) fn delete_log<T: DbTxMut>(
    txn: &T,
    field_key: &[u8],
    block_number: u64,
) -> StateResult<()> {
    txn.delete(&log_db_key(field_key, block_number))?;
    Ok(())
}

/// The field's value at the end of block `block_number`, read as the old
/// value recorded by the first change strictly after it. An entry at exactly
/// `block_number` records the value *before* that block, so it is skipped.
/// `CheckHeadState` means no later change is logged and the head state holds
/// the value.
pub(crate) fn value_at<T: DbTx>(
    txn: &T,
    field_key: &[u8],
    block_number: u64,
) -> StateResult<Felt> {
    let mut cursor = txn.cursor()?;
    let mut entry = cursor.lower_bound(&log_db_key(field_key, block_number))?;
    while let Some((key, value)) = entry {
        if key.len() != field_key.len() + 8 || !key.starts_with(field_key) {
            break;
        }
        let height = BigEndian::read_u64(&key[field_key.len()..]);
        if height < block_number {
            break;
        }
        if height == block_number {
            entry = cursor.next()?;
            continue;
        }
        return Ok(Felt::from_bytes_be_slice(&value));
    }
    Err(StateError::CheckHeadState)
}
