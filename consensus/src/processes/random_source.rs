use ethereal_consensus_core::{api::RandomSource, hashing::HasherExtensions, EpochId, Level, ProcId};
use ethereal_hashes::{DigestAlgorithm, Hash, HasherBase};

/// The common-coin-free random source used for finite, deterministic epochs:
/// randomness is derived from the unit hashes identifying a level, yielding
/// public, adversary-simulatable permutations. Every participant computes the
/// same bits from the same seed.
pub struct DeterministicRandomSource {
    algo: DigestAlgorithm,
}

impl DeterministicRandomSource {
    pub fn new(algo: DigestAlgorithm) -> Self {
        Self { algo }
    }
}

impl RandomSource for DeterministicRandomSource {
    fn data_to_include(&self, _creator: ProcId, _level: Level) -> Vec<u8> {
        // No per-unit contribution is needed when the permutations are public.
        Vec::new()
    }

    fn random_bytes(&self, epoch: EpochId, level: Level, seed: &[Hash]) -> [u8; 32] {
        let mut hasher = self.algo.random_source_hasher();
        hasher.write_u32(epoch).write_u32(level).write_len(seed.len());
        for hash in seed {
            hasher.update(hash);
        }
        hasher.finalize().as_bytes()
    }
}
