use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    AdjustmentCommand, AlertStore, AwardCommand, AwardCommit, BadgeStore, ChallengeStore,
    CreatorStatsSource, OutboxStore, RankingStore, XpLedger,
};
use crate::error::Result;
use crate::models::{
    BadgeDefinition, Challenge, ChallengeLeaderboard, ChallengeParticipation, ChallengeStatus,
    EngagementStats, LeaderboardCategory, OutboxEntry, PerformanceStats, RankingScore, Tier,
    UserBadge, UserProgress, ValidationAlert, VerificationStatus, XpEvent, XpTransaction,
};
use crate::repository::{
    alert::AlertRepository, badge::BadgeRepository, challenge::ChallengeRepository,
    creator_stats::CreatorStatsRepository, outbox::OutboxRepository, ranking::RankingRepository,
    xp::XpRepository,
};

/// Postgres-backed ledger store delegating to the repositories.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl XpLedger for PgLedgerStore {
    async fn commit_award(&self, command: &AwardCommand) -> Result<AwardCommit> {
        XpRepository::new(&self.pool).commit_award(command).await
    }

    async fn commit_adjustment(
        &self,
        command: &AdjustmentCommand,
    ) -> Result<(UserProgress, XpTransaction)> {
        XpRepository::new(&self.pool).commit_adjustment(command).await
    }

    async fn set_tier(&self, user_id: &str, tier: Tier, now: DateTime<Utc>) -> Result<UserProgress> {
        XpRepository::new(&self.pool).set_tier(user_id, tier, now).await
    }

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>> {
        XpRepository::new(&self.pool).find_progress(user_id).await
    }

    async fn list_active_progress(&self) -> Result<Vec<UserProgress>> {
        XpRepository::new(&self.pool).list_active().await
    }

    async fn count_progress(&self) -> Result<i64> {
        XpRepository::new(&self.pool).count().await
    }

    async fn find_transaction(
        &self,
        user_id: &str,
        event: XpEvent,
        context_id: &str,
    ) -> Result<Option<XpTransaction>> {
        XpRepository::new(&self.pool)
            .find_transaction(user_id, event, context_id)
            .await
    }

    async fn recent_transactions(&self, user_id: &str, limit: usize) -> Result<Vec<XpTransaction>> {
        XpRepository::new(&self.pool).recent(user_id, limit).await
    }

    async fn transactions_between(
        &self,
        user_id: &str,
        event: Option<XpEvent>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<XpTransaction>> {
        XpRepository::new(&self.pool)
            .between(user_id, event, from, to)
            .await
    }

    async fn count_transactions(&self, user_id: &str, event: XpEvent) -> Result<i64> {
        XpRepository::new(&self.pool)
            .count_for_event(user_id, event)
            .await
    }
}

#[async_trait]
impl AlertStore for PgLedgerStore {
    async fn insert_alert(&self, alert: &ValidationAlert) -> Result<()> {
        AlertRepository::new(&self.pool).insert(alert).await
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        admin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidationAlert> {
        AlertRepository::new(&self.pool)
            .resolve(alert_id, admin_id, now)
            .await
    }

    async fn list_alerts(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ValidationAlert>> {
        AlertRepository::new(&self.pool)
            .list(unresolved_only, limit)
            .await
    }
}

#[async_trait]
impl BadgeStore for PgLedgerStore {
    async fn list_badge_definitions(&self) -> Result<Vec<BadgeDefinition>> {
        BadgeRepository::new(&self.pool).list_definitions().await
    }

    async fn insert_badge_definitions(&self, definitions: &[BadgeDefinition]) -> Result<u64> {
        BadgeRepository::new(&self.pool)
            .insert_definitions(definitions)
            .await
    }

    async fn user_badges(&self, user_id: &str) -> Result<Vec<UserBadge>> {
        BadgeRepository::new(&self.pool).user_badges(user_id).await
    }

    async fn try_award_badge(&self, badge: &UserBadge) -> Result<bool> {
        BadgeRepository::new(&self.pool).try_award(badge).await
    }

    async fn badge_award_counts(&self) -> Result<Vec<(String, i64)>> {
        BadgeRepository::new(&self.pool).award_counts().await
    }
}

#[async_trait]
impl OutboxStore for PgLedgerStore {
    async fn enqueue_follow_up(
        &self,
        kind: &str,
        user_id: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        OutboxRepository::new(&self.pool)
            .insert(kind, user_id, payload, now)
            .await
    }

    async fn claim_follow_ups(
        &self,
        due_by: Option<DateTime<Utc>>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        OutboxRepository::new(&self.pool)
            .claim(due_by, lease_until, limit)
            .await
    }

    async fn delete_follow_up(&self, id: i64) -> Result<()> {
        OutboxRepository::new(&self.pool).delete(id).await
    }

    async fn record_follow_up_failure(
        &self,
        id: i64,
        attempts: i32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        OutboxRepository::new(&self.pool)
            .record_failure(id, attempts, error, retry_at)
            .await
    }

    async fn count_follow_ups(&self, dead: bool) -> Result<i64> {
        OutboxRepository::new(&self.pool).count(dead).await
    }

    async fn dead_follow_ups(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        OutboxRepository::new(&self.pool).dead(limit).await
    }
}

#[async_trait]
impl RankingStore for PgLedgerStore {
    async fn write_ranking_scores(&self, scores: &[RankingScore]) -> Result<()> {
        RankingRepository::new(&self.pool).upsert_scores(scores).await
    }

    async fn get_ranking_score(&self, user_id: &str) -> Result<Option<RankingScore>> {
        RankingRepository::new(&self.pool).find(user_id).await
    }

    async fn top_ranking_scores(
        &self,
        category: LeaderboardCategory,
        limit: usize,
    ) -> Result<Vec<RankingScore>> {
        RankingRepository::new(&self.pool).top(category, limit).await
    }

    async fn count_ranking_scores(&self) -> Result<i64> {
        RankingRepository::new(&self.pool).count().await
    }

    async fn count_ranked_above(&self, score: &RankingScore) -> Result<i64> {
        RankingRepository::new(&self.pool).count_above(score).await
    }
}

#[async_trait]
impl ChallengeStore for PgLedgerStore {
    async fn insert_challenge(&self, challenge: &Challenge) -> Result<()> {
        ChallengeRepository::new(&self.pool).create(challenge).await
    }

    async fn get_challenge(&self, challenge_id: Uuid) -> Result<Challenge> {
        ChallengeRepository::new(&self.pool)
            .find_by_id(challenge_id)
            .await
    }

    async fn list_challenges(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>> {
        ChallengeRepository::new(&self.pool).list(status).await
    }

    async fn challenges_to_activate(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>> {
        ChallengeRepository::new(&self.pool)
            .due_for_activation(now)
            .await
    }

    async fn challenges_to_complete(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>> {
        ChallengeRepository::new(&self.pool)
            .due_for_completion(now)
            .await
    }

    async fn set_challenge_status(
        &self,
        challenge_id: Uuid,
        from: ChallengeStatus,
        to: ChallengeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Challenge>> {
        ChallengeRepository::new(&self.pool)
            .set_status(challenge_id, from, to, now)
            .await
    }

    async fn join_challenge(&self, participation: &ChallengeParticipation) -> Result<Challenge> {
        ChallengeRepository::new(&self.pool).join(participation).await
    }

    async fn get_participation(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ChallengeParticipation>> {
        ChallengeRepository::new(&self.pool)
            .find_participation(challenge_id, user_id)
            .await
    }

    async fn save_progress(&self, participation: &ChallengeParticipation) -> Result<()> {
        ChallengeRepository::new(&self.pool)
            .save_progress(participation)
            .await
    }

    async fn participations(&self, challenge_id: Uuid) -> Result<Vec<ChallengeParticipation>> {
        ChallengeRepository::new(&self.pool)
            .list_participations(challenge_id)
            .await
    }

    async fn user_participations(
        &self,
        user_id: &str,
        status: ChallengeStatus,
    ) -> Result<Vec<(Challenge, ChallengeParticipation)>> {
        ChallengeRepository::new(&self.pool)
            .user_participations(user_id, status)
            .await
    }

    async fn write_leaderboard(
        &self,
        ranked: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<()> {
        ChallengeRepository::new(&self.pool)
            .write_leaderboard(ranked, board)
            .await
    }

    async fn get_leaderboard(&self, challenge_id: Uuid) -> Result<Option<ChallengeLeaderboard>> {
        ChallengeRepository::new(&self.pool)
            .find_leaderboard(challenge_id)
            .await
    }

    async fn complete_challenge(
        &self,
        challenge: &Challenge,
        settled: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<bool> {
        ChallengeRepository::new(&self.pool)
            .complete(challenge, settled, board)
            .await
    }

    async fn mark_reward_distributed(&self, challenge_id: Uuid, user_id: &str) -> Result<()> {
        ChallengeRepository::new(&self.pool)
            .mark_reward_distributed(challenge_id, user_id)
            .await
    }
}

/// Reads the `creator_stats` table kept up to date by other services.
#[derive(Clone)]
pub struct PgCreatorStats {
    pool: PgPool,
}

impl PgCreatorStats {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreatorStatsSource for PgCreatorStats {
    async fn verification(&self, user_id: &str) -> Result<VerificationStatus> {
        CreatorStatsRepository::new(&self.pool)
            .verification(user_id)
            .await
    }

    async fn performance(&self, user_id: &str) -> Result<PerformanceStats> {
        CreatorStatsRepository::new(&self.pool)
            .performance(user_id)
            .await
    }

    async fn engagement(&self, user_id: &str) -> Result<EngagementStats> {
        CreatorStatsRepository::new(&self.pool)
            .engagement(user_id)
            .await
    }
}
