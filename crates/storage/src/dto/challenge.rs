use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::{ChallengeMetric, ChallengeStatus, ChallengeType, Difficulty, RewardTiers};

/// Request payload for creating a new challenge
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateChallengeRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Title must be between 1 and 255 characters"
    ))]
    pub title: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    pub challenge_type: ChallengeType,

    pub difficulty: Difficulty,

    pub start_date: DateTime<Utc>,

    pub end_date: DateTime<Utc>,

    pub metric: ChallengeMetric,

    #[validate(range(min = 1, message = "Target value must be positive"))]
    pub target_value: i64,

    #[serde(default)]
    pub rewards: RewardTiers,
}

impl CreateChallengeRequest {
    pub fn validate_dates(&self) -> Result<(), &'static str> {
        if self.end_date <= self.start_date {
            return Err("end_date must be after start_date");
        }
        Ok(())
    }

    pub fn validate_rewards(&self) -> Result<(), &'static str> {
        let tiers = [
            &self.rewards.winner,
            &self.rewards.top3,
            &self.rewards.top10,
            &self.rewards.participation,
        ];
        if tiers.iter().any(|reward| reward.xp < 0) {
            return Err("reward xp must not be negative");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ChallengeFilter {
    pub status: Option<ChallengeStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct JoinChallengeRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
}

/// Absolute progress value reported for one participant
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ChallengeProgressRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,

    #[validate(range(min = 0, message = "Value must not be negative"))]
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SweepSummary {
    pub activated: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request() -> CreateChallengeRequest {
        let start = Utc::now();
        CreateChallengeRequest {
            title: "Weekly bookings".to_string(),
            description: None,
            challenge_type: ChallengeType::Weekly,
            difficulty: Difficulty::Medium,
            start_date: start,
            end_date: start + Duration::days(7),
            metric: ChallengeMetric::BookingsCompleted,
            target_value: 10,
            rewards: RewardTiers::default(),
        }
    }

    #[test]
    fn test_valid_request() {
        let req = request();
        assert!(req.validate().is_ok());
        assert!(req.validate_dates().is_ok());
        assert!(req.validate_rewards().is_ok());
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let mut req = request();
        req.end_date = req.start_date;
        assert!(req.validate_dates().is_err());
    }

    #[test]
    fn test_non_positive_target_is_rejected() {
        let mut req = request();
        req.target_value = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_negative_reward_is_rejected() {
        let mut req = request();
        req.rewards.top3.xp = -5;
        assert!(req.validate_rewards().is_err());
    }
}
