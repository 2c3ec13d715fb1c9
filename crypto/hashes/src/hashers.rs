use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

pub trait HasherBase {
    fn update<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self;
}

/// The digest algorithms a committee may be configured with. All processes of
/// one committee must agree on the algorithm, since unit hashes are part of
/// the protocol state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum DigestAlgorithm {
    #[default]
    Blake2b,
    Sha256,
}

impl DigestAlgorithm {
    /// Canonical unit hash: `H(id ‖ crown ‖ data ‖ rsData)`.
    #[inline(always)]
    pub fn unit_hasher(self) -> DomainHasher {
        DomainHasher::new(self, b"UnitHash")
    }

    /// Crown control hash combining the parent hashes slot by slot.
    #[inline(always)]
    pub fn crown_hasher(self) -> DomainHasher {
        DomainHasher::new(self, b"CrownHash")
    }

    /// Random-source output bytes.
    #[inline(always)]
    pub fn random_source_hasher(self) -> DomainHasher {
        DomainHasher::new(self, b"RandomSourceHash")
    }

    /// A process's threshold share toward an epoch proof.
    #[inline(always)]
    pub fn epoch_share_hasher(self) -> DomainHasher {
        DomainHasher::new(self, b"EpochShareHash")
    }

    /// The combined epoch proof carried by next-epoch dealing units.
    #[inline(always)]
    pub fn epoch_seal_hasher(self) -> DomainHasher {
        DomainHasher::new(self, b"EpochSealHash")
    }

    /// Permutation keys for timing tie-breaks and pre-block ordering.
    #[inline(always)]
    pub fn permutation_hasher(self) -> DomainHasher {
        DomainHasher::new(self, b"PermutationHash")
    }
}

/// A domain-separated hasher dispatching on the configured [`DigestAlgorithm`].
#[derive(Clone)]
pub struct DomainHasher(State);

#[derive(Clone)]
enum State {
    Blake2b(blake2b_simd::State),
    Sha256(sha2::Sha256),
}

impl DomainHasher {
    fn new(algo: DigestAlgorithm, domain: &'static [u8]) -> Self {
        match algo {
            DigestAlgorithm::Blake2b => {
                Self(State::Blake2b(blake2b_simd::Params::new().hash_length(crate::HASH_SIZE).key(domain).to_state()))
            }
            DigestAlgorithm::Sha256 => {
                use sha2::{Digest, Sha256};
                // SHA256 doesn't natively support domain separation, so we hash the
                // domain to make it constant size and feed it as a prefix.
                let mut tmp_state = Sha256::new();
                tmp_state.update(domain);
                let mut state = Sha256::new();
                state.update(tmp_state.finalize());
                Self(State::Sha256(state))
            }
        }
    }

    pub fn write<A: AsRef<[u8]>>(&mut self, data: A) {
        match &mut self.0 {
            State::Blake2b(state) => {
                state.update(data.as_ref());
            }
            State::Sha256(state) => sha2::Digest::update(state, data.as_ref()),
        }
    }

    #[inline(always)]
    pub fn finalize(self) -> crate::Hash {
        let mut out = [0u8; crate::HASH_SIZE];
        match self.0 {
            State::Blake2b(state) => out.copy_from_slice(state.finalize().as_bytes()),
            State::Sha256(state) => out.copy_from_slice(sha2::Digest::finalize(state).as_slice()),
        }
        crate::Hash::from_bytes(out)
    }
}

impl HasherBase for DomainHasher {
    #[inline(always)]
    fn update<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self {
        self.write(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_once(algo: DigestAlgorithm, parts: &[&[u8]]) -> crate::Hash {
        let mut hasher = algo.unit_hasher();
        for part in parts {
            hasher.write(part);
        }
        hasher.finalize()
    }

    #[test]
    fn test_determinism_and_incremental_hashing() {
        for algo in [DigestAlgorithm::Blake2b, DigestAlgorithm::Sha256] {
            let split = hash_once(algo, &[b"abc", b"def"]);
            let joined = hash_once(algo, &[b"abcdef"]);
            assert_eq!(split, joined, "incremental writes must match a single write for {:?}", algo);
            assert_eq!(split, hash_once(algo, &[b"abc", b"def"]));
        }
    }

    #[test]
    fn test_domain_separation() {
        for algo in [DigestAlgorithm::Blake2b, DigestAlgorithm::Sha256] {
            let unit = algo.unit_hasher().update(b"payload").clone().finalize();
            let crown = algo.crown_hasher().update(b"payload").clone().finalize();
            let seal = algo.epoch_seal_hasher().update(b"payload").clone().finalize();
            assert_ne!(unit, crown);
            assert_ne!(unit, seal);
            assert_ne!(crown, seal);
        }
    }

    #[test]
    fn test_algorithms_disagree() {
        let blake = DigestAlgorithm::Blake2b.unit_hasher().update(b"payload").clone().finalize();
        let sha = DigestAlgorithm::Sha256.unit_hasher().update(b"payload").clone().finalize();
        assert_ne!(blake, sha);
    }
}
