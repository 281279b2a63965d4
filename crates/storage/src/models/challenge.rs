use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use super::XpEvent;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChallengeType {
    Daily,
    Weekly,
    Monthly,
    Special,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

/// `upcoming -> active -> completed`; `archived` is set by operators only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChallengeStatus {
    Upcoming,
    Active,
    Completed,
    Archived,
}

impl ChallengeStatus {
    pub fn accepts_participants(&self) -> bool {
        matches!(self, Self::Upcoming | Self::Active)
    }

    pub fn can_transition_to(&self, next: ChallengeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Upcoming, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Completed, Self::Archived)
        )
    }
}

/// What a challenge measures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChallengeMetric {
    XpEarned,
    BookingsCompleted,
    FiveStarReviews,
    Referrals,
}

impl ChallengeMetric {
    /// Contribution of one ledger transaction to this metric.
    pub fn contribution(&self, event: XpEvent, xp_amount: i64) -> i64 {
        match self {
            Self::XpEarned if event.is_trigger() => xp_amount.max(0),
            Self::XpEarned => 0,
            Self::BookingsCompleted => i64::from(event == XpEvent::BookingCompleted),
            Self::FiveStarReviews => i64::from(event == XpEvent::FiveStarReview),
            Self::Referrals => i64::from(event.is_referral()),
        }
    }

    pub fn is_affected_by(&self, event: XpEvent) -> bool {
        match self {
            Self::XpEarned => event.is_trigger(),
            _ => self.contribution(event, 0) > 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Reward {
    pub xp: i64,
    pub badge_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RewardTiers {
    pub winner: Reward,
    pub top3: Reward,
    pub top10: Reward,
    pub participation: Reward,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RewardTier {
    Winner,
    Top3,
    Top10,
    Participation,
}

impl RewardTier {
    pub fn for_position(position: i32) -> Self {
        match position {
            1 => Self::Winner,
            2..=3 => Self::Top3,
            4..=10 => Self::Top10,
            _ => Self::Participation,
        }
    }
}

impl RewardTiers {
    pub fn reward_for(&self, tier: RewardTier) -> &Reward {
        match tier {
            RewardTier::Winner => &self.winner,
            RewardTier::Top3 => &self.top3,
            RewardTier::Top10 => &self.top10,
            RewardTier::Participation => &self.participation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Challenge {
    pub challenge_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub challenge_type: ChallengeType,
    pub difficulty: Difficulty,
    pub status: ChallengeStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub metric: ChallengeMetric,
    pub target_value: i64,
    pub rewards: RewardTiers,
    pub participant_count: i64,
    pub completion_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Challenge {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start_date <= at && at <= self.end_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ChallengeStatus::*;

        assert!(Upcoming.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Archived));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Upcoming));
        assert!(!Archived.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Archived));
        assert!(!Upcoming.can_transition_to(Completed));
    }

    #[test]
    fn test_reward_tier_for_position() {
        assert_eq!(RewardTier::for_position(1), RewardTier::Winner);
        assert_eq!(RewardTier::for_position(3), RewardTier::Top3);
        assert_eq!(RewardTier::for_position(4), RewardTier::Top10);
        assert_eq!(RewardTier::for_position(10), RewardTier::Top10);
        assert_eq!(RewardTier::for_position(11), RewardTier::Participation);
    }

    #[test]
    fn test_metric_contribution() {
        assert_eq!(ChallengeMetric::XpEarned.contribution(XpEvent::FiveStarReview, 50), 50);
        assert_eq!(ChallengeMetric::BookingsCompleted.contribution(XpEvent::BookingCompleted, 0), 1);
        assert_eq!(ChallengeMetric::BookingsCompleted.contribution(XpEvent::FiveStarReview, 50), 0);
        assert_eq!(ChallengeMetric::Referrals.contribution(XpEvent::ReferralFirstBooking, 150), 1);
        assert_eq!(ChallengeMetric::XpEarned.contribution(XpEvent::ChallengeReward, 500), 0);
        assert!(!ChallengeMetric::XpEarned.is_affected_by(XpEvent::ChallengeReward));
        assert!(ChallengeMetric::FiveStarReviews.is_affected_by(XpEvent::FiveStarReview));
    }
}
