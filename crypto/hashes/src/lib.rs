mod hashers;

pub use hashers::*;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hasher;
use std::str::{self, FromStr};

pub const HASH_SIZE: usize = 32;

/// A 32-byte protocol digest. Unit hashes, crown control hashes and the
/// random-source outputs are all values of this type.
#[derive(PartialEq, Eq, Ord, PartialOrd, Clone, Copy, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Hash([u8; HASH_SIZE]);

/// The zero digest, standing in for an absent parent when combining crowns.
pub const ZERO_HASH: Hash = Hash([0; HASH_SIZE]);

impl Hash {
    #[inline(always)]
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    #[inline(always)]
    pub const fn as_bytes(&self) -> [u8; HASH_SIZE] {
        self.0
    }

    #[inline(always)]
    pub fn to_le_u64(self) -> [u64; 4] {
        let mut out = [0u64; 4];
        out.iter_mut().zip(self.0.chunks_exact(8)).for_each(|(word, chunk)| {
            *word = u64::from_le_bytes(chunk.try_into().expect("chunks are exactly 8 bytes"));
        });
        out
    }

    #[inline(always)]
    pub fn from_le_u64(words: [u64; 4]) -> Self {
        let mut bytes = [0u8; HASH_SIZE];
        bytes.chunks_exact_mut(8).zip(words).for_each(|(chunk, word)| chunk.copy_from_slice(&word.to_le_bytes()));
        Hash(bytes)
    }

    /// Builds a hash from a single u64 word. To be used mainly for tests.
    #[inline(always)]
    pub fn from_u64_word(word: u64) -> Self {
        Self::from_le_u64([0, 0, 0, word])
    }
}

// We write the four little-endian words rather than the raw bytes so that
// table hashers keyed by unit hashes (see the consensus-core `UnitHasher`)
// can fold whole words instead of rehashing byte slices.
impl std::hash::Hash for Hash {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        for word in self.to_le_u64() {
            state.write_u64(word);
        }
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut hex = [0u8; HASH_SIZE * 2];
        faster_hex::hex_encode(&self.0, &mut hex).expect("The output is exactly twice the size of the input");
        f.write_str(str::from_utf8(&hex).expect("hex is always valid UTF-8"))
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for Hash {
    type Err = faster_hex::Error;

    fn from_str(hash_str: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_SIZE];
        faster_hex::hex_decode(hash_str.as_bytes(), &mut bytes)?;
        Ok(Hash(bytes))
    }
}

impl From<u64> for Hash {
    fn from(word: u64) -> Self {
        Self::from_u64_word(word)
    }
}

impl AsRef<[u8]> for Hash {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
