//! Composite creator ranking.
//!
//! Six bounded sub-scores combined with tunable weights. Every input is
//! fetched independently and a failed fetch zeroes only the sub-scores that
//! depend on it, so a score can always be produced.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use storage::dto::ranking::{
    GlobalLeaderboardResponse, LeaderboardEntryResponse, RecomputeSummary, UserRankingResponse,
};
use storage::models::{
    EngagementStats, LeaderboardCategory, PerformanceStats, RankingScore, Tier, UserProgress,
    VerificationStatus, XpEvent,
};
use storage::{CreatorStatsSource, LedgerStore};

use crate::clock::Clock;
use crate::config::RankingWeights;
use crate::error::Result;

const RECENT_VERIFICATION_DAYS: i64 = 30;
const RECENCY_FULL_DAYS: f64 = 7.0;
const RECENCY_ZERO_DAYS: f64 = 30.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubScores {
    pub xp: f64,
    pub verification: f64,
    pub tier: f64,
    pub performance: f64,
    pub engagement: f64,
    pub recency: f64,
}

/// Weighted sum of the sub-scores.
pub fn composite(scores: &SubScores, weights: &RankingWeights) -> f64 {
    scores.xp * weights.xp
        + scores.verification * weights.verification
        + scores.tier * weights.tier
        + scores.performance * weights.performance
        + scores.engagement * weights.engagement
        + scores.recency * weights.recency
}

/// Increase of this week's daily XP average over last week's, relative to
/// last week's (floored at one XP a day). Zero when activity did not grow.
pub fn daily_growth_rate(weekly_xp: i64, previous_weekly_xp: i64) -> f64 {
    let current = weekly_xp.max(0) as f64 / 7.0;
    let previous = previous_weekly_xp.max(0) as f64 / 7.0;
    ((current - previous) / previous.max(1.0)).max(0.0)
}

/// Logarithmic in the total so large balances cannot dominate. Only the
/// first term reads the total, so the score never drops as it grows.
pub fn xp_score(total_xp: i64, weekly_xp: i64, previous_weekly_xp: i64) -> f64 {
    let total = total_xp.max(0) as f64;
    let weekly = weekly_xp.max(0);
    15.0 * (total + 1.0).ln()
        + (0.5 * weekly as f64).min(50.0)
        + (10.0 * daily_growth_rate(weekly, previous_weekly_xp)).min(25.0)
}

pub fn verification_score(status: &VerificationStatus, now: DateTime<Utc>) -> f64 {
    if !status.verified {
        return 0.0;
    }
    let recent = status
        .verified_at
        .is_some_and(|at| now - at <= Duration::days(RECENT_VERIFICATION_DAYS));
    if recent { 35.0 } else { 25.0 }
}

pub fn tier_score(tier: Tier) -> f64 {
    (tier.multiplier() - 1.0) * 50.0
}

pub fn performance_score(stats: &PerformanceStats) -> f64 {
    let score = 25.0 * (stats.avg_rating - 3.0)
        + (10.0 * (stats.completed_bookings.max(0) as f64 + 1.0).ln()).min(30.0)
        + (20.0 - stats.avg_response_time_hours).max(0.0)
        - 30.0 * stats.cancellation_rate;
    score.max(0.0)
}

pub fn engagement_score(stats: &EngagementStats) -> f64 {
    (5.0 * (stats.profile_views.max(0) as f64 + 1.0).ln()).min(20.0)
        + (3.0 * (stats.search_appearances.max(0) as f64 + 1.0).ln()).min(15.0)
        + 15.0 * stats.conversion_rate
}

/// Full marks up to a week after the last activity, linear decay to zero
/// at thirty days.
pub fn recency_score(last_activity: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(last) = last_activity else {
        return 0.0;
    };
    let days = (now - last).num_seconds().max(0) as f64 / 86_400.0;
    if days <= RECENCY_FULL_DAYS {
        10.0
    } else if days < RECENCY_ZERO_DAYS {
        10.0 * (RECENCY_ZERO_DAYS - days) / (RECENCY_ZERO_DAYS - RECENCY_FULL_DAYS)
    } else {
        0.0
    }
}

pub struct RankingCalculator {
    store: Arc<dyn LedgerStore>,
    stats: Arc<dyn CreatorStatsSource>,
    clock: Arc<dyn Clock>,
    weights: RankingWeights,
    batch_size: usize,
}

impl RankingCalculator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        stats: Arc<dyn CreatorStatsSource>,
        clock: Arc<dyn Clock>,
        weights: RankingWeights,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            stats,
            clock,
            weights,
            batch_size: batch_size.max(1),
        }
    }

    /// Compute a user's score from scratch. Never fails.
    pub async fn compute(&self, user_id: &str) -> RankingScore {
        let progress = match self.store.get_progress(user_id).await {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Progress unavailable, XP sub-scores set to 0");
                None
            }
        };
        self.compute_with(user_id, progress.as_ref()).await
    }

    pub async fn score(&self, user_id: &str) -> f64 {
        self.compute(user_id).await.score
    }

    async fn compute_with(&self, user_id: &str, progress: Option<&UserProgress>) -> RankingScore {
        let now = self.clock.now();
        let mut sub = SubScores::default();

        if let Some(progress) = progress {
            let week_ago = now - Duration::days(7);
            let weekly = self.earned_between(user_id, week_ago, now).await;
            let previous = self.earned_between(user_id, week_ago - Duration::days(7), week_ago).await;
            sub.xp = xp_score(progress.total_xp, weekly, previous);
            sub.tier = tier_score(progress.tier);
            sub.recency = recency_score(progress.last_activity_at, now);
        }

        match self.stats.verification(user_id).await {
            Ok(status) => sub.verification = verification_score(&status, now),
            Err(e) => tracing::warn!(user_id, error = %e, "Verification unavailable, sub-score set to 0"),
        }
        match self.stats.performance(user_id).await {
            Ok(stats) => sub.performance = performance_score(&stats),
            Err(e) => tracing::warn!(user_id, error = %e, "Performance stats unavailable, sub-score set to 0"),
        }
        match self.stats.engagement(user_id).await {
            Ok(stats) => sub.engagement = engagement_score(&stats),
            Err(e) => tracing::warn!(user_id, error = %e, "Engagement stats unavailable, sub-score set to 0"),
        }

        let score = composite(&sub, &self.weights);

        RankingScore {
            user_id: user_id.to_string(),
            score: if score.is_finite() { score } else { 0.0 },
            xp_score: sub.xp,
            verification_score: sub.verification,
            tier_score: sub.tier,
            performance_score: sub.performance,
            engagement_score: sub.engagement,
            recency_score: sub.recency,
            updated_at: now,
        }
    }

    /// Positive XP earned from anything but admin corrections between
    /// `from` and `to`.
    async fn earned_between(&self, user_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        match self
            .store
            .transactions_between(user_id, None, from, to)
            .await
        {
            Ok(transactions) => transactions
                .iter()
                .filter(|tx| tx.event != XpEvent::AdminAdjustment)
                .map(|tx| tx.xp_amount.max(0))
                .sum(),
            Err(e) => {
                tracing::warn!(user_id, %from, error = %e, "Earned XP unavailable, treated as 0");
                0
            }
        }
    }

    /// Recompute and store the score of every user with XP, one batched
    /// write per batch. A failed batch is logged and skipped.
    pub async fn recompute_all(&self) -> Result<RecomputeSummary> {
        let users = self.store.list_active_progress().await?;
        tracing::info!(users = users.len(), batch_size = self.batch_size, "Recomputing ranking scores");

        let mut summary = RecomputeSummary {
            processed: 0,
            written: 0,
            failed_batches: 0,
        };

        for (index, batch) in users.chunks(self.batch_size).enumerate() {
            let mut scores = Vec::with_capacity(batch.len());
            for progress in batch {
                scores.push(self.compute_with(&progress.user_id, Some(progress)).await);
            }
            summary.processed += scores.len();

            match self.store.write_ranking_scores(&scores).await {
                Ok(()) => {
                    summary.written += scores.len();
                    tracing::debug!(batch = index, size = scores.len(), "Ranking batch written");
                }
                Err(e) => {
                    summary.failed_batches += 1;
                    tracing::error!(batch = index, size = scores.len(), error = %e, "Ranking batch failed");
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            written = summary.written,
            failed_batches = summary.failed_batches,
            "Ranking recompute finished"
        );
        Ok(summary)
    }

    pub async fn leaderboard(
        &self,
        category: LeaderboardCategory,
        limit: usize,
    ) -> Result<GlobalLeaderboardResponse> {
        let scores = self.store.top_ranking_scores(category, limit).await?;
        let entries = scores
            .iter()
            .enumerate()
            .map(|(index, score)| LeaderboardEntryResponse::new(index as i64 + 1, category, score))
            .collect();

        Ok(GlobalLeaderboardResponse { category, entries })
    }

    /// Position in the overall ranking, from the stored scores.
    pub async fn user_ranking(&self, user_id: &str) -> Result<UserRankingResponse> {
        let total_users = self.store.count_ranking_scores().await?;

        let Some(score) = self.store.get_ranking_score(user_id).await? else {
            return Ok(UserRankingResponse {
                user_id: user_id.to_string(),
                rank: None,
                score: 0.0,
                total_users,
            });
        };

        let above = self.store.count_ranked_above(&score).await?;
        Ok(UserRankingResponse {
            user_id: user_id.to_string(),
            rank: Some(above + 1),
            score: score.score,
            total_users,
        })
    }
}
