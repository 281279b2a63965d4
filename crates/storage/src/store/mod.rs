//! The ledger store seam.
//!
//! Every operation that must be atomic (award, adjustment, badge grant,
//! challenge join, leaderboard write, settlement) is a single trait method
//! so each backend can wrap it in its own transaction primitive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    BadgeDefinition, Challenge, ChallengeLeaderboard, ChallengeParticipation, ChallengeStatus,
    EngagementStats, LeaderboardCategory, OutboxEntry, PerformanceStats, RankingScore, Tier,
    UserBadge, UserProgress, ValidationAlert, VerificationStatus, XpEvent, XpTransaction,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCreatorStats, MemoryLedgerStore};
pub use postgres::{PgCreatorStats, PgLedgerStore};

/// One award to be applied inside the per-user ledger transaction.
#[derive(Debug, Clone)]
pub struct AwardCommand {
    pub user_id: String,
    pub event: XpEvent,
    pub base_xp: i64,
    pub daily_cap: i64,
    pub context_id: Option<String>,
    pub metadata: serde_json::Value,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AwardCommit {
    Committed {
        transaction: XpTransaction,
        progress: UserProgress,
    },
    /// A transaction with the same `(user_id, event, context_id)` exists.
    Duplicate { existing: XpTransaction },
}

#[derive(Debug, Clone)]
pub struct AdjustmentCommand {
    pub user_id: String,
    pub delta: i64,
    pub reason: String,
    pub admin_id: String,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait XpLedger: Send + Sync {
    /// Read progress, reset the day if needed, credit within the cap, write
    /// progress and append the transaction, all atomically for one user.
    async fn commit_award(&self, command: &AwardCommand) -> Result<AwardCommit>;

    async fn commit_adjustment(
        &self,
        command: &AdjustmentCommand,
    ) -> Result<(UserProgress, XpTransaction)>;

    async fn set_tier(&self, user_id: &str, tier: Tier, now: DateTime<Utc>) -> Result<UserProgress>;

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>>;

    /// Every user with a non-zero XP total.
    async fn list_active_progress(&self) -> Result<Vec<UserProgress>>;

    async fn count_progress(&self) -> Result<i64>;

    async fn find_transaction(
        &self,
        user_id: &str,
        event: XpEvent,
        context_id: &str,
    ) -> Result<Option<XpTransaction>>;

    /// Newest first.
    async fn recent_transactions(&self, user_id: &str, limit: usize) -> Result<Vec<XpTransaction>>;

    /// Oldest first, `from <= created_at <= to`.
    async fn transactions_between(
        &self,
        user_id: &str,
        event: Option<XpEvent>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<XpTransaction>>;

    async fn count_transactions(&self, user_id: &str, event: XpEvent) -> Result<i64>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &ValidationAlert) -> Result<()>;

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        admin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidationAlert>;

    /// Newest first.
    async fn list_alerts(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ValidationAlert>>;
}

#[async_trait]
pub trait BadgeStore: Send + Sync {
    async fn list_badge_definitions(&self) -> Result<Vec<BadgeDefinition>>;

    /// Insert definitions whose id is not present yet; existing rows are kept.
    async fn insert_badge_definitions(&self, definitions: &[BadgeDefinition]) -> Result<u64>;

    async fn user_badges(&self, user_id: &str) -> Result<Vec<UserBadge>>;

    /// Grant the badge unless the `(user_id, badge_id)` row already exists,
    /// re-checked inside the transaction. Returns whether a row was written.
    async fn try_award_badge(&self, badge: &UserBadge) -> Result<bool>;

    async fn badge_award_counts(&self) -> Result<Vec<(String, i64)>>;
}

#[async_trait]
pub trait RankingStore: Send + Sync {
    /// One batched multi-row upsert.
    async fn write_ranking_scores(&self, scores: &[RankingScore]) -> Result<()>;

    async fn get_ranking_score(&self, user_id: &str) -> Result<Option<RankingScore>>;

    /// Ordered by the category's value descending, then user id.
    async fn top_ranking_scores(
        &self,
        category: LeaderboardCategory,
        limit: usize,
    ) -> Result<Vec<RankingScore>>;

    async fn count_ranking_scores(&self) -> Result<i64>;

    /// Users ordered strictly before `score` in the overall ranking.
    async fn count_ranked_above(&self, score: &RankingScore) -> Result<i64>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn insert_challenge(&self, challenge: &Challenge) -> Result<()>;

    async fn get_challenge(&self, challenge_id: Uuid) -> Result<Challenge>;

    async fn list_challenges(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>>;

    /// Upcoming challenges whose start date has passed.
    async fn challenges_to_activate(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>>;

    /// Active challenges whose end date has passed.
    async fn challenges_to_complete(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>>;

    /// Move a challenge from `from` to `to`. `None` when it was no longer
    /// in `from`, in which case nothing is written.
    async fn set_challenge_status(
        &self,
        challenge_id: Uuid,
        from: ChallengeStatus,
        to: ChallengeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Challenge>>;

    /// Create the participation and bump the participant counter in one
    /// write. Fails with `ConstraintViolation` if the user already joined.
    async fn join_challenge(&self, participation: &ChallengeParticipation) -> Result<Challenge>;

    async fn get_participation(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ChallengeParticipation>>;

    /// Persist current value and percentage only.
    async fn save_progress(&self, participation: &ChallengeParticipation) -> Result<()>;

    async fn participations(&self, challenge_id: Uuid) -> Result<Vec<ChallengeParticipation>>;

    async fn user_participations(
        &self,
        user_id: &str,
        status: ChallengeStatus,
    ) -> Result<Vec<(Challenge, ChallengeParticipation)>>;

    /// Write back positions and replace the snapshot.
    async fn write_leaderboard(
        &self,
        ranked: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<()>;

    async fn get_leaderboard(&self, challenge_id: Uuid) -> Result<Option<ChallengeLeaderboard>>;

    /// Mark an active challenge completed and store every participant's
    /// final position and reward, in one batched write. Returns `false` and
    /// writes nothing if the challenge is no longer active.
    async fn complete_challenge(
        &self,
        challenge: &Challenge,
        settled: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<bool>;

    async fn mark_reward_distributed(&self, challenge_id: Uuid, user_id: &str) -> Result<()>;
}

/// Durable follow-up queue. Entries are claimed with a lease: a worker that
/// dies mid-batch leaves its entries to be picked up once the lease ends.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Store a new live entry due at `now`. Returns its id.
    async fn enqueue_follow_up(
        &self,
        kind: &str,
        user_id: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    /// Claim up to `limit` live entries due by `due_by` (every live entry
    /// when `None`), oldest first, and push their next attempt to
    /// `lease_until`.
    async fn claim_follow_ups(
        &self,
        due_by: Option<DateTime<Utc>>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>>;

    async fn delete_follow_up(&self, id: i64) -> Result<()>;

    /// Record a failed attempt. `retry_at: None` turns the entry into a
    /// dead letter.
    async fn record_follow_up_failure(
        &self,
        id: i64,
        attempts: i32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Live entries when `dead` is false, dead letters otherwise.
    async fn count_follow_ups(&self, dead: bool) -> Result<i64>;

    /// Most recent dead letters first.
    async fn dead_follow_ups(&self, limit: usize) -> Result<Vec<OutboxEntry>>;
}

/// The full document-store surface the gamification core relies on.
pub trait LedgerStore:
    XpLedger + AlertStore + BadgeStore + RankingStore + ChallengeStore + OutboxStore
{
}

impl<T> LedgerStore for T where
    T: XpLedger + AlertStore + BadgeStore + RankingStore + ChallengeStore + OutboxStore
{
}

/// Per-creator signals maintained outside the gamification core.
#[async_trait]
pub trait CreatorStatsSource: Send + Sync {
    async fn verification(&self, user_id: &str) -> Result<VerificationStatus>;

    async fn performance(&self, user_id: &str) -> Result<PerformanceStats>;

    async fn engagement(&self, user_id: &str) -> Result<EngagementStats>;
}
