use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{BadgeCategory, BadgeRarity};

/// How widely one badge has been awarded
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BadgeStatsEntry {
    pub badge_id: String,
    pub name: String,
    pub category: BadgeCategory,
    pub rarity: BadgeRarity,
    pub awarded: i64,
    /// Percentage of users with progress holding the badge.
    pub share_of_users: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BadgeStatsResponse {
    pub total_users: i64,
    pub total_awarded: i64,
    pub badges: Vec<BadgeStatsEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogRefreshResponse {
    pub seeded: u64,
    pub active_definitions: usize,
}
