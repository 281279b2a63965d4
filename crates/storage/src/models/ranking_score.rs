use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Materialized composite score of one user, recomputable at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RankingScore {
    pub user_id: String,
    pub score: f64,
    pub xp_score: f64,
    pub verification_score: f64,
    pub tier_score: f64,
    pub performance_score: f64,
    pub engagement_score: f64,
    pub recency_score: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeaderboardCategory {
    #[default]
    Overall,
    Xp,
    Performance,
    Engagement,
}

impl LeaderboardCategory {
    pub fn as_column(&self) -> &'static str {
        match self {
            Self::Overall => "score",
            Self::Xp => "xp_score",
            Self::Performance => "performance_score",
            Self::Engagement => "engagement_score",
        }
    }

    pub fn value_of(&self, score: &RankingScore) -> f64 {
        match self {
            Self::Overall => score.score,
            Self::Xp => score.xp_score,
            Self::Performance => score.performance_score,
            Self::Engagement => score.engagement_score,
        }
    }
}
