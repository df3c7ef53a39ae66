use assert_matches::assert_matches;
use starknet_types_core::felt::Felt;

use crate::db::serialization::{StorageSerde, StorageSerdeEx};
use crate::trie::TrieError;
use super::TrieKey;

#[test]
fn new_clears_stray_bits() {
    let key = TrieKey::new(4, &[0xff]);
    assert_eq!(key, TrieKey::new(4, &[0x0f]));
    assert_eq!(key.felt(), Felt::from(0x0f_u64));
}

#[test]
fn most_significant_bits() {
    let key = TrieKey::new(16, &[0xab, 0xcd]);
    assert_eq!(key.most_significant_bits(0).unwrap(), TrieKey::default());
    assert_eq!(key.most_significant_bits(4).unwrap(), TrieKey::new(4, &[0x0a]));
    assert_eq!(key.most_significant_bits(12).unwrap(), TrieKey::new(12, &[0x0a, 0xbc]));
    assert_eq!(key.most_significant_bits(16).unwrap(), key);
    assert_matches!(
        key.most_significant_bits(17),
        Err(TrieError::KeyTooShort { len: 16, requested: 17 })
    );
}

#[test]
fn most_significant_bits_of_a_full_key() {
    // 2^250: the top bit of a 251-bit key.
    let felt = Felt::from_hex_unchecked(
        "0x400000000000000000000000000000000000000000000000000000000000000",
    );
    let key = TrieKey::from_felt(&felt, 251);
    assert_eq!(key.most_significant_bits(1).unwrap(), TrieKey::new(1, &[0x01]));
    assert_eq!(key.most_significant_bits(9).unwrap(), TrieKey::new(9, &[0x01, 0x00]));
    assert_eq!(key.most_significant_bits(251).unwrap(), key);
}

#[test]
fn truncate_keeps_the_low_bits() {
    let mut key = TrieKey::new(16, &[0xab, 0xcd]);
    key.truncate(8);
    assert_eq!(key, TrieKey::new(8, &[0xcd]));
    key.truncate(5);
    assert_eq!(key, TrieKey::new(5, &[0x0d]));
    key.remove_most_significant_bit();
    assert_eq!(key, TrieKey::new(4, &[0x0d]));
    key.truncate(0);
    assert_eq!(key, TrieKey::default());
}

#[test]
fn bit_positions_count_from_the_lsb() {
    // 0b1010_0000_1111, 12 bits.
    let key = TrieKey::new(12, &[0x0a, 0x0f]);
    for position in 0..4 {
        assert!(key.is_bit_set(position));
    }
    for position in 4..9 {
        assert!(!key.is_bit_set(position));
    }
    assert!(key.is_bit_set(9));
    assert!(!key.is_bit_set(10));
    assert!(key.is_bit_set(11));
}

#[test]
fn common_prefix_len() {
    let key = TrieKey::new(8, &[0b1011_0011]);
    assert_eq!(key.common_prefix_len(&TrieKey::new(8, &[0b1011_1111])), 4);
    assert_eq!(key.common_prefix_len(&TrieKey::new(4, &[0b1011])), 4);
    assert_eq!(key.common_prefix_len(&key), 8);
    assert_eq!(key.common_prefix_len(&TrieKey::new(8, &[0b0011_0011])), 0);
    assert_eq!(key.common_prefix_len(&TrieKey::default()), 0);
}

#[test]
fn binary_encoding_round_trip() {
    let keys = [
        TrieKey::default(),
        TrieKey::new(1, &[0x01]),
        TrieKey::new(8, &[0xff]),
        TrieKey::new(12, &[0x0a, 0xbc]),
        TrieKey::from_felt(&Felt::MAX, 251),
    ];
    for key in keys {
        let bytes = key.serialize().unwrap();
        assert_eq!(bytes.len(), 1 + (key.len() as usize + 7) / 8);
        assert_eq!(TrieKey::deserialize(&mut bytes.as_slice()).unwrap(), key);
    }
}

#[test]
fn deserialize_rejects_overlong_keys() {
    assert!(TrieKey::deserialize_from(&mut [252u8].as_slice()).is_none());
}

#[test]
fn felt_round_trip() {
    let felt = Felt::from(0xabcd_u64);
    assert_eq!(TrieKey::from_felt(&felt, 251).felt(), felt);
}
