use crate::{hashing, Height, ProcId};
use borsh::{BorshDeserialize, BorshSerialize};
use ethereal_hashes::{DigestAlgorithm, Hash};
use serde::{Deserialize, Serialize};

/// Marks an absent parent in a crown's heights row. Matches the wire encoding
/// of the heights array (`repeated int32`, -1 for ⊥).
pub const NO_PARENT: i32 = -1;

/// The summary of a unit's parent set: per-creator parent heights plus a
/// combined digest over the parents' hashes. This is what a unit commits to
/// before its own hash is computed, so the receiving side can re-resolve the
/// actual parents locally by (creator, height).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Crown {
    heights: Vec<i32>,
    control_hash: Hash,
}

impl Crown {
    pub fn new(heights: Vec<i32>, control_hash: Hash) -> Self {
        Self { heights, control_hash }
    }

    /// The crown of a dealing unit: all heights absent and the control hash
    /// combining N copies of the zero digest.
    pub fn empty(n_proc: ProcId, algo: DigestAlgorithm) -> Self {
        Self::from_parents(algo, (0..n_proc).map(|_| None))
    }

    /// Builds a crown from an N-sized parent array given as (height, hash)
    /// pairs, absent slots as `None`.
    pub fn from_parents(algo: DigestAlgorithm, parents: impl ExactSizeIterator<Item = Option<(Height, Hash)>> + Clone) -> Self {
        let heights = parents.clone().map(|slot| slot.map_or(NO_PARENT, |(height, _)| height as i32)).collect();
        let control_hash = hashing::crown::combine(algo, parents.map(|slot| slot.map(|(_, hash)| hash)));
        Self { heights, control_hash }
    }

    pub fn heights(&self) -> &[i32] {
        &self.heights
    }

    pub fn control_hash(&self) -> Hash {
        self.control_hash
    }

    /// The committed height of the parent created by `creator`, or `None` for ⊥.
    pub fn parent_height(&self, creator: ProcId) -> Option<Height> {
        match self.heights.get(creator as usize) {
            Some(&height) if height >= 0 => Some(height as Height),
            _ => None,
        }
    }

    /// Number of non-absent parent slots.
    pub fn parent_count(&self) -> usize {
        self.heights.iter().filter(|&&height| height >= 0).count()
    }

    /// Committee size this crown was built for.
    pub fn member_count(&self) -> usize {
        self.heights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereal_hashes::ZERO_HASH;

    #[test]
    fn test_empty_crown() {
        let crown = Crown::empty(4, DigestAlgorithm::Blake2b);
        assert_eq!(crown.heights(), &[NO_PARENT; 4]);
        assert_eq!(crown.parent_count(), 0);
        assert_eq!(crown.member_count(), 4);
        // The empty crown commits to the committee size.
        assert_ne!(crown.control_hash(), Crown::empty(5, DigestAlgorithm::Blake2b).control_hash());
    }

    #[test]
    fn test_crown_from_parents() {
        let parents = vec![Some((0, Hash::from_u64_word(1))), None, Some((2, Hash::from_u64_word(3))), Some((0, Hash::from_u64_word(4)))];
        let crown = Crown::from_parents(DigestAlgorithm::Blake2b, parents.iter().cloned());
        assert_eq!(crown.heights(), &[0, NO_PARENT, 2, 0]);
        assert_eq!(crown.parent_height(0), Some(0));
        assert_eq!(crown.parent_height(1), None);
        assert_eq!(crown.parent_height(2), Some(2));
        assert_eq!(crown.parent_count(), 3);

        // The control hash commits to the parent hashes, not only the heights.
        let mut changed = parents.clone();
        changed[2] = Some((2, Hash::from_u64_word(99)));
        let other = Crown::from_parents(DigestAlgorithm::Blake2b, changed.into_iter());
        assert_eq!(other.heights(), crown.heights());
        assert_ne!(other.control_hash(), crown.control_hash());

        // An absent slot hashes as the zero digest, which a real parent cannot collide with.
        let mut absent = parents;
        absent[0] = Some((0, ZERO_HASH));
        let zeroed = Crown::from_parents(DigestAlgorithm::Blake2b, absent.into_iter());
        assert_ne!(zeroed.control_hash(), crown.control_hash());
    }

    #[test]
    fn test_crown_roundtrip() {
        let crown = Crown::from_parents(
            DigestAlgorithm::Sha256,
            vec![Some((7, Hash::from_u64_word(11))), None, Some((3, Hash::from_u64_word(13)))].into_iter(),
        );
        let encoded = bincode::serialize(&crown).unwrap();
        assert_eq!(bincode::deserialize::<Crown>(&encoded).unwrap(), crown);
    }
}
