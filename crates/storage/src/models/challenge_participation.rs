use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Reward, RewardTier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChallengeParticipation {
    pub challenge_id: Uuid,
    pub user_id: String,
    pub current_value: i64,
    pub target_value: i64,
    pub percentage: f64,
    pub position: Option<i32>,
    pub is_winner: bool,
    pub is_top3: bool,
    pub is_top10: bool,
    pub reward_tier: Option<RewardTier>,
    pub reward: Option<Reward>,
    pub reward_distributed: bool,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChallengeParticipation {
    pub fn new(challenge_id: Uuid, user_id: impl Into<String>, target_value: i64, now: DateTime<Utc>) -> Self {
        Self {
            challenge_id,
            user_id: user_id.into(),
            current_value: 0,
            target_value,
            percentage: 0.0,
            position: None,
            is_winner: false,
            is_top3: false,
            is_top10: false,
            reward_tier: None,
            reward: None,
            reward_distributed: false,
            joined_at: now,
            updated_at: now,
        }
    }

    pub fn set_progress(&mut self, value: i64, now: DateTime<Utc>) {
        self.current_value = value.max(0);
        self.percentage = progress_percentage(self.current_value, self.target_value);
        self.updated_at = now;
    }

    pub fn set_position(&mut self, position: i32) {
        self.position = Some(position);
        self.is_winner = position == 1;
        self.is_top3 = position <= 3;
        self.is_top10 = position <= 10;
    }
}

/// `min(100, 100 * value / target)`; a non-positive target counts as done.
pub fn progress_percentage(value: i64, target: i64) -> f64 {
    if target <= 0 {
        return 100.0;
    }
    (100.0 * value as f64 / target as f64).clamp(0.0, 100.0)
}
