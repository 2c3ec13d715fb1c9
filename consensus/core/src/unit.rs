use crate::{
    crown::Crown,
    errors::unit::{RuleError, UnitProcessResult},
    hashing, EpochId, Height, ProcId,
};
use borsh::{BorshDeserialize, BorshSerialize};
use ethereal_hashes::{DigestAlgorithm, Hash};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The packed 64-bit unit id: height in bits 0..16, creator in bits 16..32,
/// epoch in bits 32..64.
pub type UnitId = u64;

/// The largest height encodable into a unit id.
pub const MAX_HEIGHT: Height = (1 << 16) - 1;

#[inline]
pub fn unit_id(height: Height, creator: ProcId, epoch: EpochId) -> UnitId {
    debug_assert!(height <= MAX_HEIGHT);
    (height as u64) | ((creator as u64) << 16) | ((epoch as u64) << 32)
}

/// The exact inverse of [`unit_id`].
#[inline]
pub fn decode_unit_id(id: UnitId) -> (Height, ProcId, EpochId) {
    ((id & 0xffff) as Height, ((id >> 16) & 0xffff) as ProcId, (id >> 32) as EpochId)
}

/// The (creator, height) coordinates of a unit within an epoch. More than one
/// unit can occupy the same coordinates when its creator forks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct UnitCoord {
    pub creator: ProcId,
    pub height: Height,
}

impl UnitCoord {
    pub fn new(creator: ProcId, height: Height) -> Self {
        Self { creator, height }
    }
}

impl Display for UnitCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.creator, self.height)
    }
}

/// An unsigned, unsituated DAG vertex: the full content a unit commits to,
/// along with its canonical hash. Parents are committed through the crown and
/// are re-resolved locally on insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreUnit {
    pub creator: ProcId,
    pub epoch: EpochId,
    pub height: Height,
    pub crown: Crown,
    pub data: Vec<u8>,
    pub rs_data: Vec<u8>,
    /// Cached canonical hash, computed on construction. Code modifying the
    /// fields above must recompute it.
    pub hash: Hash,
}

impl PreUnit {
    pub fn new(
        creator: ProcId,
        epoch: EpochId,
        height: Height,
        crown: Crown,
        data: Vec<u8>,
        rs_data: Vec<u8>,
        algo: DigestAlgorithm,
    ) -> UnitProcessResult<Self> {
        if height > MAX_HEIGHT {
            return Err(RuleError::HeightTooLarge(height, MAX_HEIGHT));
        }
        if (creator as usize) >= crown.member_count() {
            return Err(RuleError::CreatorOutOfRange(creator, crown.member_count() as ProcId));
        }
        // Invariant: the crown's own-creator row commits to height - 1 (⊥ for dealing units).
        let self_height = crown.heights()[creator as usize];
        if self_height != height as i32 - 1 {
            return Err(RuleError::InconsistentCrown(self_height, height));
        }
        if height == 0 && crown.parent_count() != 0 {
            return Err(RuleError::DealingWithParents);
        }
        let hash = hashing::unit::hash(algo, unit_id(height, creator, epoch), &crown, &data, &rs_data);
        Ok(Self { creator, epoch, height, crown, data, rs_data, hash })
    }

    #[inline]
    pub fn id(&self) -> UnitId {
        unit_id(self.height, self.creator, self.epoch)
    }

    #[inline]
    pub fn coord(&self) -> UnitCoord {
        UnitCoord::new(self.creator, self.height)
    }

    /// A dealing unit opens its creator's chain for the epoch and has no parents.
    #[inline]
    pub fn is_dealing(&self) -> bool {
        self.height == 0
    }
}

/// The wire form of a unit: exactly the fields whose bytes define equality
/// across implementations. The receiver re-resolves parents and recomputes
/// the canonical hash locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RawPreUnit {
    pub id: UnitId,
    pub data: Vec<u8>,
    pub rs_data: Vec<u8>,
    pub heights: Vec<i32>,
    pub control_hash: Hash,
}

impl RawPreUnit {
    /// Rebuilds the situatable [`PreUnit`], recomputing the canonical hash
    /// under the committee's digest algorithm.
    pub fn materialize(self, algo: DigestAlgorithm) -> UnitProcessResult<PreUnit> {
        let (height, creator, epoch) = decode_unit_id(self.id);
        PreUnit::new(creator, epoch, height, Crown::new(self.heights, self.control_hash), self.data, self.rs_data, algo)
    }
}

impl From<&PreUnit> for RawPreUnit {
    fn from(pu: &PreUnit) -> Self {
        Self {
            id: pu.id(),
            data: pu.data.clone(),
            rs_data: pu.rs_data.clone(),
            heights: pu.crown.heights().to_vec(),
            control_hash: pu.crown.control_hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_roundtrip() {
        for height in [0, 1, 5000, MAX_HEIGHT] {
            for creator in [0u16, 3, u16::MAX] {
                for epoch in [0u32, 7, u32::MAX] {
                    assert_eq!(decode_unit_id(unit_id(height, creator, epoch)), (height, creator, epoch));
                }
            }
        }
    }

    #[test]
    fn test_preunit_construction() {
        let algo = DigestAlgorithm::Blake2b;
        let dealing = PreUnit::new(1, 0, 0, Crown::empty(4, algo), vec![], vec![], algo).unwrap();
        assert!(dealing.is_dealing());
        assert_eq!(dealing.coord(), UnitCoord::new(1, 0));

        // Crown self-row must commit to height - 1.
        assert_eq!(
            PreUnit::new(1, 0, 1, Crown::empty(4, algo), vec![], vec![], algo),
            Err(RuleError::InconsistentCrown(-1, 1))
        );
        assert_eq!(
            PreUnit::new(4, 0, 0, Crown::empty(4, algo), vec![], vec![], algo),
            Err(RuleError::CreatorOutOfRange(4, 4))
        );
        assert_eq!(
            PreUnit::new(0, 0, MAX_HEIGHT + 1, Crown::empty(4, algo), vec![], vec![], algo),
            Err(RuleError::HeightTooLarge(MAX_HEIGHT + 1, MAX_HEIGHT))
        );
    }

    #[test]
    fn test_raw_roundtrip() {
        let algo = DigestAlgorithm::Sha256;
        let pu = PreUnit::new(2, 3, 0, Crown::empty(4, algo), b"payload".to_vec(), vec![], algo).unwrap();
        let raw = RawPreUnit::from(&pu);
        let encoded = bincode::serialize(&raw).unwrap();
        let decoded: RawPreUnit = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, raw);
        assert_eq!(decoded.materialize(algo).unwrap(), pu);
    }
}
