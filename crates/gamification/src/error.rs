use storage::error::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GamificationError>;

/// Failures of the gamification services.
///
/// Award rejections (duplicate, cooldown, rate limit, suspicion) are not
/// errors; they come back as an [`AwardResult`](crate::AwardResult).
#[derive(Error, Debug)]
pub enum GamificationError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Challenge not found")]
    ChallengeNotFound,

    #[error("Challenge is {current}, cannot {action}")]
    InvalidChallengeState {
        current: storage::models::ChallengeStatus,
        action: &'static str,
    },

    #[error("User already joined this challenge")]
    AlreadyJoined,

    #[error("User is not participating in this challenge")]
    NotParticipating,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GamificationError {
    /// Whether the same call can succeed later without anything else
    /// changing. Only storage outages and lock conflicts qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_transient())
    }

    /// Map a storage `NotFound` on a challenge lookup to the domain error.
    pub(crate) fn challenge_lookup(error: StorageError) -> Self {
        match error {
            StorageError::NotFound => Self::ChallengeNotFound,
            other => Self::Storage(other),
        }
    }
}
