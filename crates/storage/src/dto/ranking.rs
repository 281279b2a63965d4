use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common::validate_limit;
use crate::models::{LeaderboardCategory, RankingScore};

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct LeaderboardFilter {
    #[serde(default)]
    pub category: LeaderboardCategory,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl LeaderboardFilter {
    pub fn validate(&self) -> Result<(), String> {
        validate_limit(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntryResponse {
    pub rank: i64,
    pub user_id: String,
    /// Value of the requested category.
    pub value: f64,
    pub score: f64,
}

impl LeaderboardEntryResponse {
    pub fn new(rank: i64, category: LeaderboardCategory, score: &RankingScore) -> Self {
        Self {
            rank,
            user_id: score.user_id.clone(),
            value: category.value_of(score),
            score: score.score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GlobalLeaderboardResponse {
    pub category: LeaderboardCategory,
    pub entries: Vec<LeaderboardEntryResponse>,
}

/// `rank` is 1-based; `None` when the user has no stored score yet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRankingResponse {
    pub user_id: String,
    pub rank: Option<i64>,
    pub score: f64,
    pub total_users: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecomputeSummary {
    pub processed: usize,
    pub written: usize,
    pub failed_batches: usize,
}
