use crate::{unit::UnitCoord, EpochId, Height, ProcId};
use ethereal_hashes::Hash;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("unit {0} was already added to the DAG")]
    DuplicateUnit(Hash),

    #[error("unit height {0} exceeds the maximum encodable height {1}")]
    HeightTooLarge(Height, Height),

    #[error("unit creator {0} is out of the committee range 0..{1}")]
    CreatorOutOfRange(ProcId, ProcId),

    #[error("unit carries a crown sized for {0} processes, expected {1}")]
    WrongCrownSize(usize, usize),

    #[error("unit epoch {0} does not match the DAG epoch {1}")]
    WrongEpoch(EpochId, EpochId),

    #[error("unit crown disagrees with its id: crown self-height is {0} but the unit height is {1}")]
    InconsistentCrown(i32, Height),

    #[error("dealing unit references parents")]
    DealingWithParents,

    #[error("unit has missing parents: {0:?}")]
    MissingParents(Vec<UnitCoord>),

    #[error("unit references {0} parents, below the quorum of {1}")]
    NotEnoughParents(usize, usize),

    #[error("no known parent combination matches the control hash {0}")]
    UnknownControlHash(Hash),

    #[error("parent of creator {1} breaks parent consistency through parent {0}")]
    InconsistentParents(Hash, ProcId),

    #[error("unit hash mismatch: declared {0} but computed {1}")]
    WrongHash(Hash, Hash),
}

pub type UnitProcessResult<T> = std::result::Result<T, RuleError>;
