use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasher, Hasher};

pub use ethereal_hashes::Hash;

pub mod api;
pub mod config;
pub mod crown;
pub mod errors;
pub mod hashing;
pub mod preblock;
pub mod unit;

/// Committee member index, 0..N-1.
pub type ProcId = u16;

/// Epoch identifier. Epochs are totally ordered and start at 0.
pub type EpochId = u32;

/// Height of a unit within its creator's chain. Heights above
/// [`unit::MAX_HEIGHT`] cannot be encoded into a unit id.
pub type Height = u32;

/// DAG depth as defined by the quorum-on-parents rule.
pub type Level = u32;

/// Map keyed by unit hashes. Unit hashes come out of the configured digest
/// and are uniformly distributed, so no key rehashing happens: [`UnitHasher`]
/// folds the words a [`Hash`] emits instead. Keys an adversary can choose
/// freely (anything that is not a unit hash) must not use these maps.
pub type UnitHashMap<V> = HashMap<Hash, V, UnitHashState>;

/// Same as `UnitHashMap` but a `HashSet`.
pub type UnitHashSet = HashSet<Hash, UnitHashState>;

/// Build state for the unit-keyed maps. Stateless, so the maps are created
/// through plain `Default::default()`.
#[derive(Clone, Copy, Default)]
pub struct UnitHashState;

impl BuildHasher for UnitHashState {
    type Hasher = UnitHasher;

    #[inline(always)]
    fn build_hasher(&self) -> Self::Hasher {
        UnitHasher(0)
    }
}

/// Folds the four little-endian words of `Hash::hash` into one table key, so
/// every bit of the digest participates rather than a single trailing word.
#[derive(Clone, Copy)]
pub struct UnitHasher(u64);

impl Hasher for UnitHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.0
    }

    #[inline(always)]
    fn write_u64(&mut self, word: u64) {
        self.0 = self.0.rotate_left(17) ^ word;
    }

    #[cold]
    fn write(&mut self, _: &[u8]) {
        unimplemented!("unit hashes are written as u64 words")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_key(hash: Hash) -> u64 {
        let mut hasher = UnitHashState.build_hasher();
        std::hash::Hash::hash(&hash, &mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_unit_hasher_folds_every_word() {
        let base = Hash::from_le_u64([1, 2, 3, 4]);
        assert_eq!(table_key(base), table_key(base));

        // Flipping any single word of the digest must change the table key;
        // a trailing-word passthrough would miss the first three.
        for word in 0..4 {
            let mut words = base.to_le_u64();
            words[word] ^= 0xff;
            assert_ne!(table_key(Hash::from_le_u64(words)), table_key(base), "word {} was ignored", word);
        }
    }

    #[test]
    fn test_unit_keyed_maps() {
        let mut map: UnitHashMap<u32> = UnitHashMap::default();
        let mut set = UnitHashSet::default();
        for word in 0..100u64 {
            assert_eq!(map.insert(Hash::from_u64_word(word), word as u32), None);
            assert!(set.insert(Hash::from_u64_word(word)));
        }
        for word in 0..100u64 {
            assert_eq!(map.get(&Hash::from_u64_word(word)), Some(&(word as u32)));
            assert!(set.contains(&Hash::from_u64_word(word)));
        }
        assert!(!set.contains(&Hash::from_u64_word(100)));
    }
}
