pub mod badge;
pub mod challenge;
pub mod challenge_leaderboard;
pub mod challenge_participation;
pub mod creator_stats;
pub mod outbox_entry;
pub mod ranking_score;
pub mod user_progress;
pub mod validation_alert;
pub mod xp_event;
pub mod xp_transaction;

pub use badge::{BadgeCategory, BadgeCriterion, BadgeDefinition, BadgeFacts, BadgeRarity, UserBadge};
pub use challenge::{
    Challenge, ChallengeMetric, ChallengeStatus, ChallengeType, Difficulty, Reward, RewardTier,
    RewardTiers,
};
pub use challenge_leaderboard::{ChallengeLeaderboard, LeaderboardEntry, rank_participations};
pub use challenge_participation::{ChallengeParticipation, progress_percentage};
pub use creator_stats::{EngagementStats, PerformanceStats, VerificationStatus};
pub use outbox_entry::OutboxEntry;
pub use ranking_score::{LeaderboardCategory, RankingScore};
pub use user_progress::{CreditOutcome, Tier, UserProgress};
pub use validation_alert::{AlertKind, Severity, ValidationAlert};
pub use xp_event::XpEvent;
pub use xp_transaction::XpTransaction;
