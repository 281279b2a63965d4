//! Challenge lifecycle: `upcoming -> active -> completed`, plus the
//! operator-only `completed -> archived`.
//!
//! Leaderboards are rebuilt from every participation on each change and
//! written back wholesale.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use storage::dto::challenge::{CreateChallengeRequest, SweepSummary};
use storage::error::StorageError;
use storage::models::{
    Challenge, ChallengeLeaderboard, ChallengeParticipation, ChallengeStatus, RewardTier, XpEvent,
    rank_participations,
};
use storage::LedgerStore;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{GamificationError, Result};
use crate::outbox::{FollowUp, Outbox};

pub struct ChallengeManager {
    store: Arc<dyn LedgerStore>,
    outbox: Arc<Outbox>,
    clock: Arc<dyn Clock>,
    leaderboard_size: usize,
}

impl ChallengeManager {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        outbox: Arc<Outbox>,
        clock: Arc<dyn Clock>,
        leaderboard_size: usize,
    ) -> Self {
        Self {
            store,
            outbox,
            clock,
            leaderboard_size,
        }
    }

    /// Create a challenge. It starts `active` if its window is already
    /// open, `upcoming` otherwise.
    pub async fn create(&self, request: CreateChallengeRequest) -> Result<Challenge> {
        request
            .validate_dates()
            .and_then(|_| request.validate_rewards())
            .map_err(|e| GamificationError::InvalidInput(e.to_string()))?;
        if request.target_value <= 0 {
            return Err(GamificationError::InvalidInput(
                "target_value must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        if request.end_date <= now {
            return Err(GamificationError::InvalidInput(
                "end_date must be in the future".to_string(),
            ));
        }
        let status = if request.start_date <= now {
            ChallengeStatus::Active
        } else {
            ChallengeStatus::Upcoming
        };

        let challenge = Challenge {
            challenge_id: Uuid::new_v4(),
            title: request.title,
            description: request.description,
            challenge_type: request.challenge_type,
            difficulty: request.difficulty,
            status,
            start_date: request.start_date,
            end_date: request.end_date,
            metric: request.metric,
            target_value: request.target_value,
            rewards: request.rewards,
            participant_count: 0,
            completion_rate: 0.0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.insert_challenge(&challenge).await?;

        tracing::info!(
            challenge_id = %challenge.challenge_id,
            title = %challenge.title,
            status = %challenge.status,
            metric = %challenge.metric,
            "Challenge created"
        );
        Ok(challenge)
    }

    pub async fn get(&self, challenge_id: Uuid) -> Result<Challenge> {
        self.store
            .get_challenge(challenge_id)
            .await
            .map_err(GamificationError::challenge_lookup)
    }

    pub async fn list(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>> {
        Ok(self.store.list_challenges(status).await?)
    }

    /// Stored snapshot, or an empty board if none was written yet.
    pub async fn leaderboard(&self, challenge_id: Uuid) -> Result<ChallengeLeaderboard> {
        if let Some(board) = self.store.get_leaderboard(challenge_id).await? {
            return Ok(board);
        }

        let challenge = self.get(challenge_id).await?;
        Ok(ChallengeLeaderboard {
            challenge_id,
            entries: Vec::new(),
            total_participants: challenge.participant_count,
            updated_at: challenge.updated_at,
        })
    }

    pub async fn join(&self, challenge_id: Uuid, user_id: &str) -> Result<ChallengeParticipation> {
        let challenge = self.get(challenge_id).await?;
        if !challenge.status.accepts_participants() {
            return Err(GamificationError::InvalidChallengeState {
                current: challenge.status,
                action: "join",
            });
        }

        let participation =
            ChallengeParticipation::new(challenge_id, user_id, challenge.target_value, self.clock.now());
        let challenge = match self.store.join_challenge(&participation).await {
            Ok(challenge) => challenge,
            Err(StorageError::ConstraintViolation(_)) => return Err(GamificationError::AlreadyJoined),
            Err(e) => return Err(GamificationError::challenge_lookup(e)),
        };

        tracing::info!(
            challenge_id = %challenge_id,
            user_id,
            participant_count = challenge.participant_count,
            "User joined challenge"
        );

        if let Err(e) = self.rebuild_leaderboard(&challenge).await {
            tracing::warn!(challenge_id = %challenge_id, error = %e, "Leaderboard rebuild after join failed");
        }
        Ok(participation)
    }

    /// Set a participant's absolute progress and rebuild the leaderboard.
    pub async fn update_progress(
        &self,
        challenge_id: Uuid,
        user_id: &str,
        value: i64,
    ) -> Result<ChallengeParticipation> {
        let challenge = self.get(challenge_id).await?;
        if challenge.status != ChallengeStatus::Active {
            return Err(GamificationError::InvalidChallengeState {
                current: challenge.status,
                action: "record progress",
            });
        }

        let mut participation = self
            .store
            .get_participation(challenge_id, user_id)
            .await?
            .ok_or(GamificationError::NotParticipating)?;

        participation.set_progress(value, self.clock.now());
        self.store.save_progress(&participation).await?;
        tracing::debug!(
            challenge_id = %challenge_id,
            user_id,
            value = participation.current_value,
            percentage = participation.percentage,
            "Challenge progress updated"
        );

        let ranked = self.rebuild_leaderboard(&challenge).await?;
        Ok(ranked
            .into_iter()
            .find(|p| p.user_id == user_id)
            .unwrap_or(participation))
    }

    /// Rank every participation, write positions back and replace the
    /// snapshot. Returns the ranked participations.
    pub async fn rebuild_leaderboard(&self, challenge: &Challenge) -> Result<Vec<ChallengeParticipation>> {
        let mut ranked = self.store.participations(challenge.challenge_id).await?;
        rank_participations(&mut ranked);

        let board = ChallengeLeaderboard::from_ranked(
            challenge.challenge_id,
            &ranked,
            self.leaderboard_size,
            self.clock.now(),
        );
        self.store.write_leaderboard(&ranked, &board).await?;

        tracing::debug!(
            challenge_id = %challenge.challenge_id,
            participants = ranked.len(),
            "Challenge leaderboard rebuilt"
        );
        Ok(ranked)
    }

    /// Recompute the user's progress in every active challenge whose metric
    /// the event feeds, from ledger transactions inside the challenge
    /// window. Returns the number of participations that changed.
    pub async fn on_xp_event(&self, user_id: &str, event: XpEvent) -> Result<usize> {
        let joined = self
            .store
            .user_participations(user_id, ChallengeStatus::Active)
            .await?;

        let now = self.clock.now();
        let mut updated = 0;
        let mut first_error = None;

        for (challenge, participation) in joined {
            if !challenge.metric.is_affected_by(event) {
                continue;
            }

            match self.refresh_participation(&challenge, participation, now).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        challenge_id = %challenge.challenge_id,
                        user_id,
                        error = %e,
                        "Failed to update challenge progress"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(updated),
        }
    }

    async fn refresh_participation(
        &self,
        challenge: &Challenge,
        mut participation: ChallengeParticipation,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let until = challenge.end_date.min(now);
        let value: i64 = self
            .store
            .transactions_between(&participation.user_id, None, challenge.start_date, until)
            .await?
            .iter()
            .map(|tx| challenge.metric.contribution(tx.event, tx.xp_amount))
            .sum();

        if value == participation.current_value {
            return Ok(false);
        }

        participation.set_progress(value, now);
        self.store.save_progress(&participation).await?;
        self.rebuild_leaderboard(challenge).await?;
        Ok(true)
    }

    /// Force `upcoming -> active` ahead of the start date.
    pub async fn activate(&self, challenge_id: Uuid) -> Result<Challenge> {
        self.transition(challenge_id, ChallengeStatus::Active, "activate").await
    }

    /// Complete a challenge now and settle its rewards.
    pub async fn complete(&self, challenge_id: Uuid) -> Result<Challenge> {
        let challenge = self.get(challenge_id).await?;
        if !challenge.status.can_transition_to(ChallengeStatus::Completed) {
            return Err(GamificationError::InvalidChallengeState {
                current: challenge.status,
                action: "complete",
            });
        }
        self.settle(challenge).await
    }

    pub async fn archive(&self, challenge_id: Uuid) -> Result<Challenge> {
        self.transition(challenge_id, ChallengeStatus::Archived, "archive").await
    }

    async fn transition(
        &self,
        challenge_id: Uuid,
        next: ChallengeStatus,
        action: &'static str,
    ) -> Result<Challenge> {
        let challenge = self.get(challenge_id).await?;
        if !challenge.status.can_transition_to(next) {
            return Err(GamificationError::InvalidChallengeState {
                current: challenge.status,
                action,
            });
        }

        let Some(updated) = self
            .store
            .set_challenge_status(challenge_id, challenge.status, next, self.clock.now())
            .await
            .map_err(GamificationError::challenge_lookup)?
        else {
            return Err(self.lost_race(challenge_id, action).await);
        };

        tracing::info!(
            challenge_id = %challenge_id,
            from = %challenge.status,
            to = %next,
            "Challenge status changed"
        );
        Ok(updated)
    }

    /// Error for a status change another caller got to first.
    async fn lost_race(&self, challenge_id: Uuid, action: &'static str) -> GamificationError {
        match self.get(challenge_id).await {
            Ok(current) => {
                tracing::debug!(challenge_id = %challenge_id, current = %current.status, action, "Challenge status changed concurrently");
                GamificationError::InvalidChallengeState {
                    current: current.status,
                    action,
                }
            }
            Err(e) => e,
        }
    }

    /// Final ranking, reward tiers and completion rate, written in one
    /// store call. Participants without progress get no reward. Payouts
    /// are queued as follow-ups.
    async fn settle(&self, mut challenge: Challenge) -> Result<Challenge> {
        let now = self.clock.now();
        let mut ranked = self.store.participations(challenge.challenge_id).await?;
        rank_participations(&mut ranked);

        let mut rewarded = 0usize;
        for participation in ranked.iter_mut().filter(|p| p.current_value > 0) {
            let position = participation.position.unwrap_or(i32::MAX);
            let tier = RewardTier::for_position(position);
            participation.reward_tier = Some(tier);
            participation.reward = Some(challenge.rewards.reward_for(tier).clone());
            rewarded += 1;
        }

        let participants = ranked.len();
        challenge.status = ChallengeStatus::Completed;
        challenge.participant_count = participants as i64;
        challenge.completion_rate = if participants > 0 {
            rewarded as f64 / participants as f64
        } else {
            0.0
        };
        challenge.completed_at = Some(now);
        challenge.updated_at = now;

        let board = ChallengeLeaderboard::from_ranked(challenge.challenge_id, &ranked, self.leaderboard_size, now);
        let completed = self
            .store
            .complete_challenge(&challenge, &ranked, &board)
            .await
            .map_err(GamificationError::challenge_lookup)?;
        if !completed {
            return Err(self.lost_race(challenge.challenge_id, "complete").await);
        }

        for participation in &ranked {
            let (Some(tier), Some(reward)) = (participation.reward_tier, participation.reward.as_ref()) else {
                continue;
            };
            if reward.xp <= 0 && reward.badge_id.is_none() {
                continue;
            }
            self.outbox
                .enqueue(FollowUp::ChallengeReward {
                    user_id: participation.user_id.clone(),
                    challenge_id: challenge.challenge_id,
                    tier,
                    reward: reward.clone(),
                })
                .await;
        }

        tracing::info!(
            challenge_id = %challenge.challenge_id,
            participants,
            rewarded,
            completion_rate = challenge.completion_rate,
            "Challenge completed"
        );
        Ok(challenge)
    }

    /// Activate challenges whose start has passed, then complete those
    /// whose end has passed. Each challenge is handled on its own.
    pub async fn sweep(&self) -> SweepSummary {
        let now = self.clock.now();
        let mut summary = SweepSummary {
            activated: 0,
            completed: 0,
            failed: 0,
        };

        match self.store.challenges_to_activate(now).await {
            Ok(due) => {
                for challenge in due {
                    match self
                        .store
                        .set_challenge_status(
                            challenge.challenge_id,
                            ChallengeStatus::Upcoming,
                            ChallengeStatus::Active,
                            now,
                        )
                        .await
                    {
                        Ok(Some(_)) => {
                            summary.activated += 1;
                            tracing::info!(challenge_id = %challenge.challenge_id, "Challenge activated");
                        }
                        Ok(None) => {
                            tracing::debug!(challenge_id = %challenge.challenge_id, "Challenge already moved on");
                        }
                        Err(e) => {
                            summary.failed += 1;
                            tracing::error!(challenge_id = %challenge.challenge_id, error = %e, "Failed to activate challenge");
                        }
                    }
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(error = %e, "Failed to query challenges to activate");
            }
        }

        match self.store.challenges_to_complete(now).await {
            Ok(due) => {
                for challenge in due {
                    let challenge_id = challenge.challenge_id;
                    match self.settle(challenge).await {
                        Ok(_) => summary.completed += 1,
                        Err(GamificationError::InvalidChallengeState { .. }) => {
                            tracing::debug!(challenge_id = %challenge_id, "Challenge completed elsewhere");
                        }
                        Err(e) => {
                            summary.failed += 1;
                            tracing::error!(challenge_id = %challenge_id, error = %e, "Failed to complete challenge");
                        }
                    }
                }
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(error = %e, "Failed to query challenges to complete");
            }
        }

        tracing::info!(
            activated = summary.activated,
            completed = summary.completed,
            failed = summary.failed,
            "Challenge sweep finished"
        );
        summary
    }

    /// Mark a participant's reward as paid out.
    pub async fn mark_reward_distributed(&self, challenge_id: Uuid, user_id: &str) -> Result<()> {
        self.store.mark_reward_distributed(challenge_id, user_id).await?;
        tracing::debug!(challenge_id = %challenge_id, user_id, "Challenge reward distributed");
        Ok(())
    }

    pub(crate) fn reward_metadata(challenge_id: Uuid, tier: RewardTier) -> serde_json::Value {
        json!({ "challenge_id": challenge_id, "tier": tier })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::outbox::RetryPolicy;
    use chrono::{Duration, TimeZone};
    use storage::models::{ChallengeMetric, ChallengeType, Difficulty, Reward, RewardTiers};
    use storage::{AwardCommand, ChallengeStore, MemoryLedgerStore, XpLedger};

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        clock: Arc<ManualClock>,
        outbox: Arc<Outbox>,
        manager: ChallengeManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()));
        let outbox = Arc::new(Outbox::new(
            store.clone(),
            clock.clone(),
            RetryPolicy::new(5, Duration::seconds(2)),
        ));
        let manager = ChallengeManager::new(store.clone(), outbox.clone(), clock.clone(), 50);

        Fixture {
            store,
            clock,
            outbox,
            manager,
        }
    }

    fn request(start: DateTime<Utc>, metric: ChallengeMetric) -> CreateChallengeRequest {
        CreateChallengeRequest {
            title: "July sprint".to_string(),
            description: None,
            challenge_type: ChallengeType::Weekly,
            difficulty: Difficulty::Medium,
            start_date: start,
            end_date: start + Duration::days(7),
            metric,
            target_value: 1000,
            rewards: RewardTiers {
                winner: Reward {
                    xp: 500,
                    badge_id: Some("xp_1000".to_string()),
                },
                top3: Reward {
                    xp: 200,
                    badge_id: None,
                },
                top10: Reward::default(),
                participation: Reward {
                    xp: 25,
                    badge_id: None,
                },
            },
        }
    }

    async fn active_challenge(f: &Fixture, metric: ChallengeMetric) -> Challenge {
        f.manager
            .create(request(f.clock.now() - Duration::hours(1), metric))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_status_follows_start_date() {
        let f = fixture();
        let now = f.clock.now();

        let later = f
            .manager
            .create(request(now + Duration::days(1), ChallengeMetric::XpEarned))
            .await
            .unwrap();
        assert_eq!(later.status, ChallengeStatus::Upcoming);

        let running = active_challenge(&f, ChallengeMetric::XpEarned).await;
        assert_eq!(running.status, ChallengeStatus::Active);

        let over = f
            .manager
            .create(request(now - Duration::days(10), ChallengeMetric::XpEarned))
            .await;
        assert!(matches!(over, Err(GamificationError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_join_increments_participant_count_once() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;

        f.manager.join(challenge.challenge_id, "creator-1").await.unwrap();
        let after = f.manager.get(challenge.challenge_id).await.unwrap();
        assert_eq!(after.participant_count, 1);

        let again = f.manager.join(challenge.challenge_id, "creator-1").await;
        assert!(matches!(again, Err(GamificationError::AlreadyJoined)));
        assert_eq!(f.manager.get(challenge.challenge_id).await.unwrap().participant_count, 1);
    }

    #[tokio::test]
    async fn test_join_upcoming_succeeds_and_completed_is_rejected() {
        let f = fixture();
        let upcoming = f
            .manager
            .create(request(f.clock.now() + Duration::days(2), ChallengeMetric::XpEarned))
            .await
            .unwrap();
        assert!(f.manager.join(upcoming.challenge_id, "creator-1").await.is_ok());

        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;
        f.manager.complete(challenge.challenge_id).await.unwrap();

        let late = f.manager.join(challenge.challenge_id, "creator-1").await;
        assert!(matches!(
            late,
            Err(GamificationError::InvalidChallengeState {
                current: ChallengeStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_challenge_and_non_participant() {
        let f = fixture();
        let missing = f.manager.join(Uuid::new_v4(), "creator-1").await;
        assert!(matches!(missing, Err(GamificationError::ChallengeNotFound)));

        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;
        let outsider = f.manager.update_progress(challenge.challenge_id, "creator-9", 10).await;
        assert!(matches!(outsider, Err(GamificationError::NotParticipating)));
    }

    #[tokio::test]
    async fn test_tied_values_get_sequential_positions() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;
        let id = challenge.challenge_id;

        for user in ["d", "c", "b", "a"] {
            f.manager.join(id, user).await.unwrap();
            f.clock.advance(Duration::minutes(1));
        }
        for (user, value) in [("a", 1000), ("b", 800), ("c", 800), ("d", 600)] {
            f.manager.update_progress(id, user, value).await.unwrap();
        }

        let board = f.manager.leaderboard(id).await.unwrap();
        let order: Vec<(&str, i32)> = board
            .entries
            .iter()
            .map(|e| (e.user_id.as_str(), e.position))
            .collect();
        // "c" joined before "b", so it wins the 800 tie.
        assert_eq!(order, vec![("a", 1), ("c", 2), ("b", 3), ("d", 4)]);
        assert_eq!(board.entries[0].percentage, 100.0);

        let stored = f.store.get_participation(id, "a").await.unwrap().unwrap();
        assert_eq!(stored.position, Some(1));
        assert!(stored.is_winner);
    }

    #[tokio::test]
    async fn test_completion_without_participants() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;

        let completed = f.manager.complete(challenge.challenge_id).await.unwrap();

        assert_eq!(completed.status, ChallengeStatus::Completed);
        assert_eq!(completed.completion_rate, 0.0);
        assert!(completed.completed_at.is_some());
        assert_eq!(f.outbox.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_completion_assigns_reward_tiers() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;
        let id = challenge.challenge_id;

        for user in ["amy", "bob", "cat"] {
            f.manager.join(id, user).await.unwrap();
        }
        f.manager.update_progress(id, "amy", 50).await.unwrap();
        f.manager.update_progress(id, "cat", 20).await.unwrap();

        let completed = f.manager.complete(id).await.unwrap();
        assert!((completed.completion_rate - 2.0 / 3.0).abs() < 1e-9);

        let amy = f.store.get_participation(id, "amy").await.unwrap().unwrap();
        assert_eq!(amy.reward_tier, Some(RewardTier::Winner));
        assert_eq!(amy.reward.as_ref().map(|r| r.xp), Some(500));

        let cat = f.store.get_participation(id, "cat").await.unwrap().unwrap();
        assert_eq!(cat.reward_tier, Some(RewardTier::Top3));

        let bob = f.store.get_participation(id, "bob").await.unwrap().unwrap();
        assert_eq!(bob.reward_tier, None);

        assert_eq!(f.outbox.pending_len().await.unwrap(), 2);

        let twice = f.manager.complete(id).await;
        assert!(matches!(twice, Err(GamificationError::InvalidChallengeState { .. })));
    }

    #[tokio::test]
    async fn test_progress_is_recomputed_from_ledger() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::BookingsCompleted).await;
        f.manager.join(challenge.challenge_id, "creator-1").await.unwrap();

        for context in ["b-1", "b-2"] {
            f.store
                .commit_award(&AwardCommand {
                    user_id: "creator-1".to_string(),
                    event: XpEvent::BookingCompleted,
                    base_xp: 100,
                    daily_cap: 300,
                    context_id: Some(context.to_string()),
                    metadata: serde_json::Value::Null,
                    now: f.clock.now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(f.manager.on_xp_event("creator-1", XpEvent::BookingCompleted).await.unwrap(), 1);
        assert_eq!(f.manager.on_xp_event("creator-1", XpEvent::BookingCompleted).await.unwrap(), 0);
        assert_eq!(f.manager.on_xp_event("creator-1", XpEvent::FiveStarReview).await.unwrap(), 0);

        let stored = f
            .store
            .get_participation(challenge.challenge_id, "creator-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_value, 2);
        assert_eq!(stored.percentage, 0.2);
    }

    #[tokio::test]
    async fn test_sweep_activates_then_completes() {
        let f = fixture();
        let now = f.clock.now();
        let soon = f
            .manager
            .create(request(now + Duration::hours(1), ChallengeMetric::XpEarned))
            .await
            .unwrap();
        let running = active_challenge(&f, ChallengeMetric::XpEarned).await;

        f.clock.advance(Duration::hours(2));
        let first = f.manager.sweep().await;
        assert_eq!((first.activated, first.completed, first.failed), (1, 0, 0));
        assert_eq!(f.manager.get(soon.challenge_id).await.unwrap().status, ChallengeStatus::Active);

        f.clock.advance(Duration::days(7));
        let second = f.manager.sweep().await;
        assert_eq!((second.activated, second.completed, second.failed), (0, 2, 0));
        assert_eq!(
            f.manager.get(running.challenge_id).await.unwrap().status,
            ChallengeStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_upcoming_challenge_cannot_be_completed() {
        let f = fixture();
        let upcoming = f
            .manager
            .create(request(f.clock.now() + Duration::days(1), ChallengeMetric::XpEarned))
            .await
            .unwrap();

        let result = f.manager.complete(upcoming.challenge_id).await;
        assert!(matches!(
            result,
            Err(GamificationError::InvalidChallengeState {
                current: ChallengeStatus::Upcoming,
                ..
            })
        ));
        assert_eq!(
            f.manager.get(upcoming.challenge_id).await.unwrap().status,
            ChallengeStatus::Upcoming
        );
    }

    #[tokio::test]
    async fn test_concurrent_completion_settles_once() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;
        let id = challenge.challenge_id;
        for (user, value) in [("amy", 50), ("bob", 20)] {
            f.manager.join(id, user).await.unwrap();
            f.manager.update_progress(id, user, value).await.unwrap();
        }

        let stale = f.manager.get(id).await.unwrap();
        let (first, second) = tokio::join!(f.manager.complete(id), f.manager.complete(id));
        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(f.outbox.pending_len().await.unwrap(), 2);

        // A caller that read the challenge while it was still active.
        let late = f.manager.settle(stale).await;
        assert!(matches!(
            late,
            Err(GamificationError::InvalidChallengeState {
                current: ChallengeStatus::Completed,
                ..
            })
        ));
        assert_eq!(f.outbox.pending_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_leaderboard_snapshot_keeps_top_fifty() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;
        let id = challenge.challenge_id;

        for i in 0..60 {
            let user = format!("creator-{i:02}");
            f.manager.join(id, &user).await.unwrap();
            f.manager.update_progress(id, &user, 10 + i).await.unwrap();
        }

        let board = f.manager.leaderboard(id).await.unwrap();
        assert_eq!(board.entries.len(), 50);
        assert_eq!(board.entries[0].user_id, "creator-59");
        assert_eq!(board.entries[0].position, 1);
        assert_eq!(board.entries[49].position, 50);
        assert_eq!(board.entries[49].user_id, "creator-10");

        let outside = f.store.get_participation(id, "creator-00").await.unwrap().unwrap();
        assert_eq!(outside.position, Some(60));
    }

    #[tokio::test]
    async fn test_archive_requires_completion() {
        let f = fixture();
        let challenge = active_challenge(&f, ChallengeMetric::XpEarned).await;

        assert!(f.manager.archive(challenge.challenge_id).await.is_err());

        f.manager.complete(challenge.challenge_id).await.unwrap();
        let archived = f.manager.archive(challenge.challenge_id).await.unwrap();
        assert_eq!(archived.status, ChallengeStatus::Archived);
    }
}
