//! Bit paths into the trie.

#[cfg(test)]
#[path = "key_test.rs"]
mod key_test;

use std::fmt;

use starknet_types_core::felt::Felt;

use crate::db::serialization::{StorageSerde, StorageSerdeError};
use super::TrieError;

pub(crate) const KEY_BYTES: usize = 32;

/// A bit path of length 0..=251, most-significant bit first.
///
/// The bits occupy the least-significant `len` positions of `bitset`; unused
/// high bits are always zero, so equality can compare the raw bytes. Every
/// mutating operation re-canonicalises.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct TrieKey {
    len: u8,
    bitset: [u8; KEY_BYTES],
}

impl TrieKey {
    /// A key of `len` bits taken from the low end of `bytes` (big-endian).
    pub fn new(len: u8, bytes: &[u8]) -> Self {
        assert!(bytes.len() <= KEY_BYTES, "bytes do not fit in the bitset");
        let mut bitset = [0u8; KEY_BYTES];
        bitset[KEY_BYTES - bytes.len()..].copy_from_slice(bytes);
        let mut key = Self { len, bitset };
        key.clear_unused_bits();
        key
    }

    /// The low `len` bits of the felt's big-endian representation.
    pub fn from_felt(felt: &Felt, len: u8) -> Self {
        Self::new(len, &felt.to_bytes_be())
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the bit at `position` is 1; position 0 is the least
    /// significant (rightmost) bit.
    pub fn is_bit_set(&self, position: u8) -> bool {
        let byte = self.bitset[KEY_BYTES - 1 - position as usize / 8];
        (byte >> (position % 8)) & 1 != 0
    }

    /// A new key holding the first `n` most significant bits of this one.
    pub fn most_significant_bits(&self, n: u8) -> Result<TrieKey, TrieError> {
        if n > self.len {
            return Err(TrieError::KeyTooShort { len: self.len, requested: n });
        }
        let mut key = *self;
        key.shift_right(self.len - n);
        key.len = n;
        key.clear_unused_bits();
        Ok(key)
    }

    /// Truncates the key to its `length` least significant bits, clearing the
    /// rest.
    pub fn truncate(&mut self, length: u8) {
        debug_assert!(length <= self.len);
        self.len = length;
        self.clear_unused_bits();
    }

    pub fn remove_most_significant_bit(&mut self) {
        if self.len > 0 {
            self.truncate(self.len - 1);
        }
    }

    /// The bitset as a field element.
    pub fn felt(&self) -> Felt {
        Felt::from_bytes_be(&self.bitset)
    }

    /// The number of leading (most significant) bits shared with `other`.
    pub fn common_prefix_len(&self, other: &TrieKey) -> u8 {
        let max = self.len.min(other.len);
        let mut shared = 0;
        while shared < max
            && self.is_bit_set(self.len - 1 - shared) == other.is_bit_set(other.len - 1 - shared)
        {
            shared += 1;
        }
        shared
    }

    fn bytes_needed(&self) -> usize {
        (self.len as usize + 7) / 8
    }

    fn in_use_bytes(&self) -> &[u8] {
        &self.bitset[KEY_BYTES - self.bytes_needed()..]
    }

    fn clear_unused_bits(&mut self) {
        let needed = self.bytes_needed();
        for byte in &mut self.bitset[..KEY_BYTES - needed] {
            *byte = 0;
        }
        let rem = self.len % 8;
        if rem != 0 && needed > 0 {
            self.bitset[KEY_BYTES - needed] &= 0xff >> (8 - rem);
        }
    }

    fn shift_right(&mut self, shift: u8) {
        if shift == 0 {
            return;
        }
        let byte_shift = shift as usize / 8;
        let bit_shift = shift as u32 % 8;
        for i in (0..KEY_BYTES).rev() {
            let src = i as isize - byte_shift as isize;
            let mut byte = if src >= 0 { self.bitset[src as usize] >> bit_shift } else { 0 };
            if bit_shift > 0 && src >= 1 {
                byte |= self.bitset[src as usize - 1] << (8 - bit_shift);
            }
            self.bitset[i] = byte;
        }
    }
}

impl fmt::Debug for TrieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) 0x{}", self.len, hex::encode(self.bitset))
    }
}

// One byte of length followed by the in-use suffix of the bitset.
impl StorageSerde for TrieKey {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        self.len.serialize_into(res)?;
        Ok(res.write_all(self.in_use_bytes())?)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        let len = u8::deserialize_from(bytes)?;
        if len > super::TRIE_HEIGHT {
            return None;
        }
        let mut bitset = [0u8; KEY_BYTES];
        let needed = (len as usize + 7) / 8;
        bytes.read_exact(&mut bitset[KEY_BYTES - needed..]).ok()?;
        let mut key = TrieKey { len, bitset };
        key.clear_unused_bits();
        Some(key)
    }
}
