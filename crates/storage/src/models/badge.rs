use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::Tier;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BadgeCategory {
    Milestone,
    Quality,
    Experience,
    Status,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
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
pub enum BadgeRarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// Eligibility rule attached to a badge definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BadgeCriterion {
    XpThreshold(i64),
    BookingCount(i64),
    /// Number of five-star reviews received.
    ReviewRating(i64),
    TierReached(Tier),
}

/// Aggregates a criterion is evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BadgeFacts {
    pub total_xp: i64,
    pub booking_count: i64,
    pub five_star_count: i64,
    pub tier: Tier,
}

impl BadgeCriterion {
    pub fn is_met(&self, facts: &BadgeFacts) -> bool {
        match *self {
            Self::XpThreshold(threshold) => facts.total_xp >= threshold,
            Self::BookingCount(count) => facts.booking_count >= count,
            Self::ReviewRating(count) => facts.five_star_count >= count,
            Self::TierReached(tier) => facts.tier >= tier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BadgeDefinition {
    pub badge_id: String,
    pub name: String,
    pub description: String,
    pub category: BadgeCategory,
    pub rarity: BadgeRarity,
    pub criterion: BadgeCriterion,
    pub xp_reward: Option<i64>,
    pub active: bool,
}

/// At most one row exists per `(user_id, badge_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserBadge {
    pub user_id: String,
    pub badge_id: String,
    pub awarded_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_evaluation() {
        let facts = BadgeFacts {
            total_xp: 950,
            booking_count: 10,
            five_star_count: 0,
            tier: Tier::Verified,
        };

        assert!(!BadgeCriterion::XpThreshold(1000).is_met(&facts));
        assert!(BadgeCriterion::BookingCount(10).is_met(&facts));
        assert!(!BadgeCriterion::ReviewRating(1).is_met(&facts));
        assert!(BadgeCriterion::TierReached(Tier::Standard).is_met(&facts));
        assert!(BadgeCriterion::TierReached(Tier::Verified).is_met(&facts));
        assert!(!BadgeCriterion::TierReached(Tier::Signature).is_met(&facts));
    }

    #[test]
    fn test_criterion_wire_format() {
        let json = serde_json::to_value(BadgeCriterion::TierReached(Tier::Signature)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "tier_reached", "value": "signature"}));

        let parsed: BadgeCriterion =
            serde_json::from_value(serde_json::json!({"type": "booking_count", "value": 10})).unwrap();
        assert_eq!(parsed, BadgeCriterion::BookingCount(10));
    }
}
