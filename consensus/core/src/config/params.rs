use crate::{
    errors::config::{ConfigError, ConfigResult},
    EpochId, Level, ProcId,
};
use ethereal_hashes::DigestAlgorithm;
use serde::{Deserialize, Serialize};

/// First relative voting round of the timing decision.
pub const DEFAULT_VOTE_DELAY: Level = 1;

/// Upper bound on the relative rounds the timing decision examines before the
/// deterministic fallback kicks in.
pub const DEFAULT_POPULARITY_CAP: Level = 10;

/// Highest level whose units still fetch application data; units above it are
/// finishing units carrying epoch-proof shares.
pub const DEFAULT_LAST_LEVEL: Level = 20;

/// Committee-wide protocol parameters. Every process of one committee must be
/// configured identically except for `pid`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Committee size N. At most ⌊(N−1)/3⌋ members may be Byzantine.
    pub n_proc: ProcId,
    /// This process's index within the committee.
    pub pid: ProcId,
    /// When set, a new unit takes the current candidates as parents directly
    /// instead of restricting them to the level right below its own.
    pub can_skip_level: bool,
    pub last_level: Level,
    pub number_of_epochs: EpochId,
    pub digest_algorithm: DigestAlgorithm,
    pub vote_delay: Level,
    pub popularity_cap: Level,
}

impl Params {
    pub fn new(n_proc: ProcId, pid: ProcId) -> Self {
        Self {
            n_proc,
            pid,
            can_skip_level: true,
            last_level: DEFAULT_LAST_LEVEL,
            number_of_epochs: 1,
            digest_algorithm: DigestAlgorithm::default(),
            vote_delay: DEFAULT_VOTE_DELAY,
            popularity_cap: DEFAULT_POPULARITY_CAP,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.n_proc == 0 {
            return Err(ConfigError::EmptyCommittee);
        }
        if self.pid >= self.n_proc {
            return Err(ConfigError::PidOutOfRange(self.pid, self.n_proc));
        }
        if self.vote_delay == 0 {
            return Err(ConfigError::ZeroVoteDelay);
        }
        // The deterministic common-vote prefix occupies the two rounds past the
        // vote delay; the cap must leave room for it.
        if self.popularity_cap <= self.vote_delay + 2 {
            return Err(ConfigError::PopularityCapTooLow(self.popularity_cap, self.vote_delay));
        }
        if self.last_level == 0 {
            return Err(ConfigError::LastLevelZero);
        }
        if self.number_of_epochs == 0 {
            return Err(ConfigError::NoEpochs);
        }
        Ok(())
    }

    /// f = ⌊(N−1)/3⌋, the number of tolerated Byzantine members.
    #[inline]
    pub fn max_faulty(&self) -> usize {
        (self.n_proc as usize - 1) / 3
    }

    /// 2f+1, the size of an intersecting honest majority.
    #[inline]
    pub fn quorum(&self) -> usize {
        2 * self.max_faulty() + 1
    }

    #[inline]
    pub fn is_quorum(&self, k: usize) -> bool {
        k >= self.quorum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_sizes() {
        let cases = [(1u16, 0, 1), (4, 1, 3), (7, 2, 5), (10, 3, 7), (50, 16, 33)];
        for (n, f, q) in cases {
            let params = Params::new(n, 0);
            assert_eq!(params.max_faulty(), f);
            assert_eq!(params.quorum(), q);
            assert!(params.is_quorum(q));
            assert!(!params.is_quorum(q - 1));
        }
    }

    #[test]
    fn test_validation() {
        assert!(Params::new(4, 0).validate().is_ok());
        assert_eq!(Params::new(0, 0).validate(), Err(ConfigError::EmptyCommittee));
        assert_eq!(Params::new(4, 4).validate(), Err(ConfigError::PidOutOfRange(4, 4)));

        let mut params = Params::new(4, 0);
        params.vote_delay = 0;
        assert_eq!(params.validate(), Err(ConfigError::ZeroVoteDelay));

        let mut params = Params::new(4, 0);
        params.popularity_cap = params.vote_delay + 2;
        assert_eq!(params.validate(), Err(ConfigError::PopularityCapTooLow(3, 1)));

        let mut params = Params::new(4, 0);
        params.number_of_epochs = 0;
        assert_eq!(params.validate(), Err(ConfigError::NoEpochs));
    }
}
