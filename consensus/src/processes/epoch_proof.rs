use ethereal_consensus_core::{
    api::{EpochProof, EpochProofFactory},
    hashing::HasherExtensions,
    EpochId, ProcId,
};
use ethereal_hashes::{DigestAlgorithm, Hash, HasherBase, HASH_SIZE};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// creator ‖ timing hash ‖ share digest
pub const SHARE_LEN: usize = 2 + HASH_SIZE + HASH_SIZE;

/// timing hash ‖ seal digest
pub const SEAL_LEN: usize = HASH_SIZE + HASH_SIZE;

/// A deterministic hash-based threshold scheme standing in for a real
/// threshold signature; actual TSS backends plug in through the
/// [`EpochProof`] factory. A share binds (epoch, timing hash, creator); the
/// combined seal binds (epoch, timing hash) and carries the timing hash so it
/// verifies without local ordering knowledge.
pub struct ThresholdEpochProof {
    epoch: EpochId,
    pid: ProcId,
    quorum: usize,
    algo: DigestAlgorithm,
    /// Contributing creators per timing hash; only shares over the same
    /// timing unit combine.
    shares: HashMap<Hash, HashSet<ProcId>>,
}

impl ThresholdEpochProof {
    pub fn new(epoch: EpochId, pid: ProcId, quorum: usize, algo: DigestAlgorithm) -> Self {
        Self { epoch, pid, quorum, algo, shares: HashMap::new() }
    }

    fn share_digest(&self, timing_hash: Hash, creator: ProcId) -> Hash {
        let mut hasher = self.algo.epoch_share_hasher();
        hasher.write_u32(self.epoch).update(timing_hash).update(creator.to_le_bytes());
        hasher.finalize()
    }

    fn seal_digest(&self, timing_hash: Hash) -> Hash {
        let mut hasher = self.algo.epoch_seal_hasher();
        hasher.write_u32(self.epoch).update(timing_hash);
        hasher.finalize()
    }

    fn seal(&self, timing_hash: Hash) -> Vec<u8> {
        let mut out = Vec::with_capacity(SEAL_LEN);
        out.extend_from_slice(&timing_hash.as_bytes());
        out.extend_from_slice(&self.seal_digest(timing_hash).as_bytes());
        out
    }
}

impl EpochProof for ThresholdEpochProof {
    fn build_share(&mut self, timing_hash: Hash) -> Vec<u8> {
        let mut out = Vec::with_capacity(SHARE_LEN);
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&timing_hash.as_bytes());
        out.extend_from_slice(&self.share_digest(timing_hash, self.pid).as_bytes());
        // Count our own contribution as well.
        self.shares.entry(timing_hash).or_default().insert(self.pid);
        out
    }

    fn try_building(&mut self, creator: ProcId, share: &[u8]) -> Option<Vec<u8>> {
        if share.len() != SHARE_LEN {
            return None;
        }
        let declared = ProcId::from_le_bytes(share[..2].try_into().expect("the slice is exactly 2 bytes"));
        if declared != creator {
            debug!("epoch {}: share declares creator {} but was carried by {}", self.epoch, declared, creator);
            return None;
        }
        let timing_hash = Hash::from_bytes(share[2..2 + HASH_SIZE].try_into().expect("the slice is exactly 32 bytes"));
        if share[2 + HASH_SIZE..] != self.share_digest(timing_hash, creator).as_bytes() {
            debug!("epoch {}: invalid share from {}", self.epoch, creator);
            return None;
        }
        let contributors = self.shares.entry(timing_hash).or_default();
        contributors.insert(creator);
        let reached = contributors.len() >= self.quorum;
        reached.then(|| self.seal(timing_hash))
    }

    fn verify(&self, seal: &[u8]) -> bool {
        if seal.len() != SEAL_LEN {
            return false;
        }
        let timing_hash = Hash::from_bytes(seal[..HASH_SIZE].try_into().expect("the slice is exactly 32 bytes"));
        seal[HASH_SIZE..] == self.seal_digest(timing_hash).as_bytes()
    }
}

pub fn deterministic_proof_factory(pid: ProcId, quorum: usize, algo: DigestAlgorithm) -> EpochProofFactory {
    Arc::new(move |epoch| Box::new(ThresholdEpochProof::new(epoch, pid, quorum, algo)))
}
