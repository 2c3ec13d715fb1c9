use crate::{EpochId, Level, ProcId};
use ethereal_hashes::Hash;
use std::sync::Arc;

/// Supplies application payloads to the creator. Called at most once per
/// local unit; `None` means the unit carries no payload.
pub trait DataSource: Send {
    fn get_data(&mut self) -> Option<Vec<u8>>;
}

/// The threshold epoch-proof hooks of a single epoch. A share is this
/// process's contribution toward the combined signature over
/// (epoch, H(timing unit)); the seal is the combined signature carried by
/// dealing units of the next epoch.
pub trait EpochProof: Send {
    /// Produces this process's share over the given timing unit hash.
    fn build_share(&mut self, timing_hash: Hash) -> Vec<u8>;

    /// Accumulates a share carried by a finishing unit of this epoch and
    /// returns the combined seal once 2f+1 distinct valid shares are present.
    fn try_building(&mut self, creator: ProcId, share: &[u8]) -> Option<Vec<u8>>;

    /// Validates the seal carried by a dealing unit of the following epoch.
    fn verify(&self, seal: &[u8]) -> bool;
}

/// Creates the [`EpochProof`] state for each epoch this process participates in.
pub type EpochProofFactory = Arc<dyn Fn(EpochId) -> Box<dyn EpochProof> + Send + Sync>;

/// Adversary-resistant pseudo-random bits keyed by (level, process). The same
/// bits feed every participant and drive both the timing-selection tie-breaks
/// and the pre-block random bytes.
pub trait RandomSource: Send + Sync {
    /// What a unit created by `creator` at `level` must embed in its `rs_data`.
    fn data_to_include(&self, creator: ProcId, level: Level) -> Vec<u8>;

    /// Deterministically produces 32 bytes from the unit hashes identifying a
    /// level.
    fn random_bytes(&self, epoch: EpochId, level: Level, seed: &[Hash]) -> [u8; 32];
}
