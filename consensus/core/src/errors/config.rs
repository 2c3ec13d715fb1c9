use crate::{Level, ProcId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration: committee size must be positive")]
    EmptyCommittee,

    #[error("Configuration: pid {0} is out of the committee range 0..{1}")]
    PidOutOfRange(ProcId, ProcId),

    #[error("Configuration: vote delay must be positive")]
    ZeroVoteDelay,

    #[error("Configuration: popularity cap {0} leaves no voting rounds past the vote delay {1}")]
    PopularityCapTooLow(Level, Level),

    #[error("Configuration: last level must be positive")]
    LastLevelZero,

    #[error("Configuration: the number of epochs must be positive")]
    NoEpochs,
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
