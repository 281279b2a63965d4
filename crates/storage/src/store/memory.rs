//! In-process ledger store for tests and database-less local runs.
//!
//! A single mutex guards the whole state, which makes every trait method
//! trivially atomic. Nothing awaits while the lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    AdjustmentCommand, AlertStore, AwardCommand, AwardCommit, BadgeStore, ChallengeStore,
    CreatorStatsSource, OutboxStore, RankingStore, XpLedger,
};
use crate::error::{Result, StorageError};
use crate::models::{
    BadgeDefinition, Challenge, ChallengeLeaderboard, ChallengeParticipation, ChallengeStatus,
    EngagementStats, LeaderboardCategory, OutboxEntry, PerformanceStats, RankingScore, Tier,
    UserBadge, UserProgress, ValidationAlert, VerificationStatus, XpEvent, XpTransaction,
};

#[derive(Default)]
struct MemoryState {
    progress: HashMap<String, UserProgress>,
    transactions: Vec<XpTransaction>,
    alerts: Vec<ValidationAlert>,
    badge_definitions: Vec<BadgeDefinition>,
    user_badges: HashMap<(String, String), UserBadge>,
    ranking_scores: HashMap<String, RankingScore>,
    challenges: HashMap<Uuid, Challenge>,
    participations: HashMap<(Uuid, String), ChallengeParticipation>,
    leaderboards: HashMap<Uuid, ChallengeLeaderboard>,
    outbox: Vec<OutboxEntry>,
    next_outbox_id: i64,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored transactions, across all users.
    pub fn transaction_count(&self) -> usize {
        self.state.lock().map(|s| s.transactions.len()).unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store switched off".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

fn same_context(tx: &XpTransaction, user_id: &str, event: XpEvent, context_id: &str) -> bool {
    tx.user_id == user_id && tx.event == event && tx.context_id.as_deref() == Some(context_id)
}

#[async_trait]
impl XpLedger for MemoryLedgerStore {
    async fn commit_award(&self, command: &AwardCommand) -> Result<AwardCommit> {
        let mut state = self.state()?;

        if let Some(context_id) = command.context_id.as_deref()
            && let Some(existing) = state
                .transactions
                .iter()
                .find(|tx| same_context(tx, &command.user_id, command.event, context_id))
        {
            return Ok(AwardCommit::Duplicate {
                existing: existing.clone(),
            });
        }

        let mut progress = state
            .progress
            .get(&command.user_id)
            .cloned()
            .unwrap_or_else(|| UserProgress::new(&command.user_id, command.now));

        let outcome = progress.apply_award(command.base_xp, command.daily_cap, command.now);

        let transaction = XpTransaction::new(
            &command.user_id,
            command.event,
            outcome.credited,
            command.context_id.clone(),
            command.metadata.clone(),
            outcome.capped,
            outcome.credited_at,
        );

        state.progress.insert(command.user_id.clone(), progress.clone());
        state.transactions.push(transaction.clone());

        Ok(AwardCommit::Committed {
            transaction,
            progress,
        })
    }

    async fn commit_adjustment(
        &self,
        command: &AdjustmentCommand,
    ) -> Result<(UserProgress, XpTransaction)> {
        let mut state = self.state()?;

        let mut progress = state
            .progress
            .get(&command.user_id)
            .cloned()
            .unwrap_or_else(|| UserProgress::new(&command.user_id, command.now));

        let applied = progress.apply_adjustment(command.delta, command.now);

        let transaction = XpTransaction::new(
            &command.user_id,
            XpEvent::AdminAdjustment,
            applied,
            None,
            serde_json::json!({
                "reason": command.reason,
                "admin_id": command.admin_id,
                "requested_delta": command.delta,
            }),
            false,
            command.now,
        );

        state.progress.insert(command.user_id.clone(), progress.clone());
        state.transactions.push(transaction.clone());

        Ok((progress, transaction))
    }

    async fn set_tier(&self, user_id: &str, tier: Tier, now: DateTime<Utc>) -> Result<UserProgress> {
        let mut state = self.state()?;
        let progress = state
            .progress
            .entry(user_id.to_string())
            .or_insert_with(|| UserProgress::new(user_id, now));
        progress.tier = tier;
        progress.updated_at = now;
        Ok(progress.clone())
    }

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>> {
        Ok(self.state()?.progress.get(user_id).cloned())
    }

    async fn list_active_progress(&self) -> Result<Vec<UserProgress>> {
        let state = self.state()?;
        let mut active: Vec<UserProgress> = state
            .progress
            .values()
            .filter(|p| p.total_xp > 0)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(active)
    }

    async fn count_progress(&self) -> Result<i64> {
        Ok(self.state()?.progress.len() as i64)
    }

    async fn find_transaction(
        &self,
        user_id: &str,
        event: XpEvent,
        context_id: &str,
    ) -> Result<Option<XpTransaction>> {
        let state = self.state()?;
        Ok(state
            .transactions
            .iter()
            .find(|tx| same_context(tx, user_id, event, context_id))
            .cloned())
    }

    async fn recent_transactions(&self, user_id: &str, limit: usize) -> Result<Vec<XpTransaction>> {
        let state = self.state()?;
        let mut recent: Vec<XpTransaction> = state
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn transactions_between(
        &self,
        user_id: &str,
        event: Option<XpEvent>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<XpTransaction>> {
        let state = self.state()?;
        let mut found: Vec<XpTransaction> = state
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .filter(|tx| event.is_none_or(|e| tx.event == e))
            .filter(|tx| tx.created_at >= from && tx.created_at <= to)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn count_transactions(&self, user_id: &str, event: XpEvent) -> Result<i64> {
        let state = self.state()?;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id && tx.event == event)
            .count() as i64)
    }
}

#[async_trait]
impl AlertStore for MemoryLedgerStore {
    async fn insert_alert(&self, alert: &ValidationAlert) -> Result<()> {
        self.state()?.alerts.push(alert.clone());
        Ok(())
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        admin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidationAlert> {
        let mut state = self.state()?;
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id)
            .ok_or(StorageError::NotFound)?;
        alert.resolve(admin_id, now);
        Ok(alert.clone())
    }

    async fn list_alerts(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ValidationAlert>> {
        let state = self.state()?;
        let mut alerts: Vec<ValidationAlert> = state
            .alerts
            .iter()
            .filter(|a| !unresolved_only || !a.resolved)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit);
        Ok(alerts)
    }
}

#[async_trait]
impl BadgeStore for MemoryLedgerStore {
    async fn list_badge_definitions(&self) -> Result<Vec<BadgeDefinition>> {
        Ok(self.state()?.badge_definitions.clone())
    }

    async fn insert_badge_definitions(&self, definitions: &[BadgeDefinition]) -> Result<u64> {
        let mut state = self.state()?;
        let mut inserted = 0;
        for definition in definitions {
            if !state
                .badge_definitions
                .iter()
                .any(|d| d.badge_id == definition.badge_id)
            {
                state.badge_definitions.push(definition.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn user_badges(&self, user_id: &str) -> Result<Vec<UserBadge>> {
        let state = self.state()?;
        let mut badges: Vec<UserBadge> = state
            .user_badges
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        badges.sort_by(|a, b| a.awarded_at.cmp(&b.awarded_at));
        Ok(badges)
    }

    async fn try_award_badge(&self, badge: &UserBadge) -> Result<bool> {
        let mut state = self.state()?;
        let key = (badge.user_id.clone(), badge.badge_id.clone());
        if state.user_badges.contains_key(&key) {
            return Ok(false);
        }
        state.user_badges.insert(key, badge.clone());
        Ok(true)
    }

    async fn badge_award_counts(&self) -> Result<Vec<(String, i64)>> {
        let state = self.state()?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for (_, badge_id) in state.user_badges.keys() {
            *counts.entry(badge_id.clone()).or_default() += 1;
        }
        let mut counts: Vec<(String, i64)> = counts.into_iter().collect();
        counts.sort();
        Ok(counts)
    }
}

fn ranks_before(category: LeaderboardCategory, a: &RankingScore, b: &RankingScore) -> std::cmp::Ordering {
    category
        .value_of(b)
        .total_cmp(&category.value_of(a))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

#[async_trait]
impl RankingStore for MemoryLedgerStore {
    async fn write_ranking_scores(&self, scores: &[RankingScore]) -> Result<()> {
        let mut state = self.state()?;
        for score in scores {
            state.ranking_scores.insert(score.user_id.clone(), score.clone());
        }
        Ok(())
    }

    async fn get_ranking_score(&self, user_id: &str) -> Result<Option<RankingScore>> {
        Ok(self.state()?.ranking_scores.get(user_id).cloned())
    }

    async fn top_ranking_scores(
        &self,
        category: LeaderboardCategory,
        limit: usize,
    ) -> Result<Vec<RankingScore>> {
        let state = self.state()?;
        let mut scores: Vec<RankingScore> = state.ranking_scores.values().cloned().collect();
        scores.sort_by(|a, b| ranks_before(category, a, b));
        scores.truncate(limit);
        Ok(scores)
    }

    async fn count_ranking_scores(&self) -> Result<i64> {
        Ok(self.state()?.ranking_scores.len() as i64)
    }

    async fn count_ranked_above(&self, score: &RankingScore) -> Result<i64> {
        let state = self.state()?;
        Ok(state
            .ranking_scores
            .values()
            .filter(|other| {
                ranks_before(LeaderboardCategory::Overall, other, score).is_lt()
            })
            .count() as i64)
    }
}

#[async_trait]
impl ChallengeStore for MemoryLedgerStore {
    async fn insert_challenge(&self, challenge: &Challenge) -> Result<()> {
        let mut state = self.state()?;
        if state.challenges.contains_key(&challenge.challenge_id) {
            return Err(StorageError::ConstraintViolation(
                "Challenge already exists".to_string(),
            ));
        }
        state.challenges.insert(challenge.challenge_id, challenge.clone());
        Ok(())
    }

    async fn get_challenge(&self, challenge_id: Uuid) -> Result<Challenge> {
        self.state()?
            .challenges
            .get(&challenge_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_challenges(&self, status: Option<ChallengeStatus>) -> Result<Vec<Challenge>> {
        let state = self.state()?;
        let mut challenges: Vec<Challenge> = state
            .challenges
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        challenges.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(challenges)
    }

    async fn challenges_to_activate(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>> {
        let state = self.state()?;
        Ok(state
            .challenges
            .values()
            .filter(|c| c.status == ChallengeStatus::Upcoming && c.start_date <= now)
            .cloned()
            .collect())
    }

    async fn challenges_to_complete(&self, now: DateTime<Utc>) -> Result<Vec<Challenge>> {
        let state = self.state()?;
        Ok(state
            .challenges
            .values()
            .filter(|c| c.status == ChallengeStatus::Active && c.end_date <= now)
            .cloned()
            .collect())
    }

    async fn set_challenge_status(
        &self,
        challenge_id: Uuid,
        from: ChallengeStatus,
        to: ChallengeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Challenge>> {
        let mut state = self.state()?;
        let challenge = state
            .challenges
            .get_mut(&challenge_id)
            .ok_or(StorageError::NotFound)?;
        if challenge.status != from {
            return Ok(None);
        }
        challenge.status = to;
        challenge.updated_at = now;
        Ok(Some(challenge.clone()))
    }

    async fn join_challenge(&self, participation: &ChallengeParticipation) -> Result<Challenge> {
        let mut state = self.state()?;
        let key = (participation.challenge_id, participation.user_id.clone());
        if state.participations.contains_key(&key) {
            return Err(StorageError::ConstraintViolation(
                "User already joined this challenge".to_string(),
            ));
        }

        let challenge = state
            .challenges
            .get_mut(&participation.challenge_id)
            .ok_or(StorageError::NotFound)?;
        challenge.participant_count += 1;
        challenge.updated_at = participation.joined_at;
        let challenge = challenge.clone();

        state.participations.insert(key, participation.clone());
        Ok(challenge)
    }

    async fn get_participation(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ChallengeParticipation>> {
        Ok(self
            .state()?
            .participations
            .get(&(challenge_id, user_id.to_string()))
            .cloned())
    }

    async fn save_progress(&self, participation: &ChallengeParticipation) -> Result<()> {
        let mut state = self.state()?;
        let stored = state
            .participations
            .get_mut(&(participation.challenge_id, participation.user_id.clone()))
            .ok_or(StorageError::NotFound)?;
        stored.current_value = participation.current_value;
        stored.percentage = participation.percentage;
        stored.updated_at = participation.updated_at;
        Ok(())
    }

    async fn participations(&self, challenge_id: Uuid) -> Result<Vec<ChallengeParticipation>> {
        let state = self.state()?;
        let mut found: Vec<ChallengeParticipation> = state
            .participations
            .values()
            .filter(|p| p.challenge_id == challenge_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.current_value.cmp(&a.current_value));
        Ok(found)
    }

    async fn user_participations(
        &self,
        user_id: &str,
        status: ChallengeStatus,
    ) -> Result<Vec<(Challenge, ChallengeParticipation)>> {
        let state = self.state()?;
        Ok(state
            .participations
            .values()
            .filter(|p| p.user_id == user_id)
            .filter_map(|p| {
                state
                    .challenges
                    .get(&p.challenge_id)
                    .filter(|c| c.status == status)
                    .map(|c| (c.clone(), p.clone()))
            })
            .collect())
    }

    async fn write_leaderboard(
        &self,
        ranked: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<()> {
        let mut state = self.state()?;
        for participation in ranked {
            if let Some(stored) = state
                .participations
                .get_mut(&(participation.challenge_id, participation.user_id.clone()))
            {
                stored.position = participation.position;
                stored.is_winner = participation.is_winner;
                stored.is_top3 = participation.is_top3;
                stored.is_top10 = participation.is_top10;
            }
        }
        state.leaderboards.insert(board.challenge_id, board.clone());
        Ok(())
    }

    async fn get_leaderboard(&self, challenge_id: Uuid) -> Result<Option<ChallengeLeaderboard>> {
        Ok(self.state()?.leaderboards.get(&challenge_id).cloned())
    }

    async fn complete_challenge(
        &self,
        challenge: &Challenge,
        settled: &[ChallengeParticipation],
        board: &ChallengeLeaderboard,
    ) -> Result<bool> {
        let mut state = self.state()?;
        let stored = state
            .challenges
            .get(&challenge.challenge_id)
            .ok_or(StorageError::NotFound)?;
        if stored.status != ChallengeStatus::Active {
            return Ok(false);
        }

        for participation in settled {
            let key = (participation.challenge_id, participation.user_id.clone());
            if let Some(stored) = state.participations.get_mut(&key) {
                stored.position = participation.position;
                stored.is_winner = participation.is_winner;
                stored.is_top3 = participation.is_top3;
                stored.is_top10 = participation.is_top10;
                stored.reward_tier = participation.reward_tier;
                stored.reward = participation.reward.clone();
            }
        }
        let mut completed = challenge.clone();
        completed.status = ChallengeStatus::Completed;
        state.challenges.insert(challenge.challenge_id, completed);
        state.leaderboards.insert(board.challenge_id, board.clone());
        Ok(true)
    }

    async fn mark_reward_distributed(&self, challenge_id: Uuid, user_id: &str) -> Result<()> {
        let mut state = self.state()?;
        let stored = state
            .participations
            .get_mut(&(challenge_id, user_id.to_string()))
            .ok_or(StorageError::NotFound)?;
        stored.reward_distributed = true;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryLedgerStore {
    async fn enqueue_follow_up(
        &self,
        kind: &str,
        user_id: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut state = self.state()?;
        state.next_outbox_id += 1;
        let id = state.next_outbox_id;
        state.outbox.push(OutboxEntry {
            id,
            kind: kind.to_string(),
            user_id: user_id.to_string(),
            payload: payload.clone(),
            attempts: 0,
            last_error: None,
            dead: false,
            next_attempt_at: now,
            enqueued_at: now,
        });
        Ok(id)
    }

    async fn claim_follow_ups(
        &self,
        due_by: Option<DateTime<Utc>>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        let mut state = self.state()?;
        let mut claimed = Vec::new();
        for entry in state.outbox.iter_mut() {
            if claimed.len() == limit {
                break;
            }
            let due = match due_by {
                Some(due_by) => entry.is_due(due_by),
                None => !entry.dead,
            };
            if due {
                entry.next_attempt_at = lease_until;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn delete_follow_up(&self, id: i64) -> Result<()> {
        self.state()?.outbox.retain(|entry| entry.id != id);
        Ok(())
    }

    async fn record_follow_up_failure(
        &self,
        id: i64,
        attempts: i32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.state()?;
        let entry = state
            .outbox
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(StorageError::NotFound)?;
        entry.attempts = attempts;
        entry.last_error = Some(error.to_string());
        match retry_at {
            Some(at) => entry.next_attempt_at = at,
            None => entry.dead = true,
        }
        Ok(())
    }

    async fn count_follow_ups(&self, dead: bool) -> Result<i64> {
        Ok(self.state()?.outbox.iter().filter(|entry| entry.dead == dead).count() as i64)
    }

    async fn dead_follow_ups(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let state = self.state()?;
        Ok(state
            .outbox
            .iter()
            .rev()
            .filter(|entry| entry.dead)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Settable creator signals for tests and local runs. Users without an
/// entry read as unverified with zeroed statistics.
#[derive(Default)]
pub struct MemoryCreatorStats {
    verification: Mutex<HashMap<String, VerificationStatus>>,
    performance: Mutex<HashMap<String, PerformanceStats>>,
    engagement: Mutex<HashMap<String, EngagementStats>>,
}

fn read<T: Clone + Default>(map: &Mutex<HashMap<String, T>>, user_id: &str) -> Result<T> {
    let map = map
        .lock()
        .map_err(|_| StorageError::Unavailable("creator stats lock poisoned".to_string()))?;
    Ok(map.get(user_id).cloned().unwrap_or_default())
}

fn write<T>(map: &Mutex<HashMap<String, T>>, user_id: &str, value: T) {
    if let Ok(mut map) = map.lock() {
        map.insert(user_id.to_string(), value);
    }
}

impl MemoryCreatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verification(&self, user_id: &str, status: VerificationStatus) {
        write(&self.verification, user_id, status);
    }

    pub fn set_performance(&self, user_id: &str, stats: PerformanceStats) {
        write(&self.performance, user_id, stats);
    }

    pub fn set_engagement(&self, user_id: &str, stats: EngagementStats) {
        write(&self.engagement, user_id, stats);
    }
}

#[async_trait]
impl CreatorStatsSource for MemoryCreatorStats {
    async fn verification(&self, user_id: &str) -> Result<VerificationStatus> {
        read(&self.verification, user_id)
    }

    async fn performance(&self, user_id: &str) -> Result<PerformanceStats> {
        read(&self.performance, user_id)
    }

    async fn engagement(&self, user_id: &str) -> Result<EngagementStats> {
        read(&self.engagement, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn command(user: &str, base_xp: i64, context: Option<&str>, now: DateTime<Utc>) -> AwardCommand {
        AwardCommand {
            user_id: user.to_string(),
            event: XpEvent::BookingCompleted,
            base_xp,
            daily_cap: 300,
            context_id: context.map(String::from),
            metadata: serde_json::Value::Null,
            now,
        }
    }

    #[tokio::test]
    async fn test_commit_award_creates_progress_lazily() {
        let store = MemoryLedgerStore::new();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();

        assert!(store.get_progress("u1").await.unwrap().is_none());

        let commit = store.commit_award(&command("u1", 100, None, now)).await.unwrap();
        match commit {
            AwardCommit::Committed { transaction, progress } => {
                assert_eq!(transaction.xp_amount, 100);
                assert_eq!(progress.total_xp, 100);
            }
            AwardCommit::Duplicate { .. } => panic!("unexpected duplicate"),
        }
    }

    #[tokio::test]
    async fn test_claimed_follow_ups_are_leased() {
        let store = MemoryLedgerStore::new();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let payload = serde_json::json!({ "kind": "badge_check" });

        let first = store.enqueue_follow_up("badge_check", "u1", &payload, now).await.unwrap();
        store.enqueue_follow_up("badge_check", "u2", &payload, now).await.unwrap();

        let lease = now + Duration::minutes(5);
        let claimed = store.claim_follow_ups(Some(now), lease, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first);

        let rest = store.claim_follow_ups(Some(now), lease, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].user_id, "u2");
        assert!(store.claim_follow_ups(Some(now), lease, 10).await.unwrap().is_empty());

        // Lease expiry hands both back.
        assert_eq!(store.claim_follow_ups(Some(lease), lease, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_follow_up_waits_or_goes_dead() {
        let store = MemoryLedgerStore::new();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let payload = serde_json::Value::Null;
        let retried = store.enqueue_follow_up("badge_check", "u1", &payload, now).await.unwrap();
        let dropped = store.enqueue_follow_up("badge_bonus", "u1", &payload, now).await.unwrap();

        store
            .record_follow_up_failure(retried, 1, "down", Some(now + Duration::seconds(2)))
            .await
            .unwrap();
        store.record_follow_up_failure(dropped, 1, "bad payload", None).await.unwrap();

        assert!(store.claim_follow_ups(Some(now), now, 10).await.unwrap().is_empty());
        assert_eq!(store.count_follow_ups(false).await.unwrap(), 1);
        assert_eq!(store.count_follow_ups(true).await.unwrap(), 1);

        let dead = store.dead_follow_ups(10).await.unwrap();
        assert_eq!(dead[0].id, dropped);
        assert_eq!(dead[0].last_error.as_deref(), Some("bad payload"));

        // Dead letters are never claimed, even when ignoring the schedule.
        let claimed = store.claim_follow_ups(None, now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        store.delete_follow_up(retried).await.unwrap();
        assert_eq!(store.count_follow_ups(false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_award_rejects_replayed_context() {
        let store = MemoryLedgerStore::new();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();

        store.commit_award(&command("u1", 100, Some("booking-1"), now)).await.unwrap();
        let replay = store
            .commit_award(&command("u1", 100, Some("booking-1"), now + Duration::hours(2)))
            .await
            .unwrap();

        assert!(matches!(replay, AwardCommit::Duplicate { .. }));
        assert_eq!(store.transaction_count(), 1);
        assert_eq!(store.get_progress("u1").await.unwrap().unwrap().total_xp, 100);
    }

    #[tokio::test]
    async fn test_stale_award_is_booked_on_the_current_day() {
        let store = MemoryLedgerStore::new();
        let evening = Utc.with_ymd_and_hms(2025, 5, 1, 22, 0, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).unwrap();

        store.commit_award(&command("u1", 300, None, evening)).await.unwrap();
        store.commit_award(&command("u1", 100, None, midnight)).await.unwrap();
        let stale = store
            .commit_award(&command("u1", 300, None, evening + Duration::hours(1)))
            .await
            .unwrap();

        match stale {
            AwardCommit::Committed { transaction, progress } => {
                assert_eq!(transaction.xp_amount, 200);
                assert_eq!(transaction.created_at, midnight);
                assert_eq!(progress.daily_xp, 300);
            }
            AwardCommit::Duplicate { .. } => panic!("unexpected duplicate"),
        }

        let day_one: i64 = store
            .transactions_between("u1", None, evening, midnight - Duration::seconds(1))
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.xp_amount)
            .sum();
        assert_eq!(day_one, 300);
    }

    #[tokio::test]
    async fn test_join_challenge_twice_is_rejected() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let challenge = Challenge {
            challenge_id: Uuid::new_v4(),
            title: "Spring sprint".to_string(),
            description: None,
            challenge_type: crate::models::ChallengeType::Weekly,
            difficulty: crate::models::Difficulty::Easy,
            status: ChallengeStatus::Active,
            start_date: now,
            end_date: now + Duration::days(7),
            metric: crate::models::ChallengeMetric::BookingsCompleted,
            target_value: 5,
            rewards: Default::default(),
            participant_count: 0,
            completion_rate: 0.0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        store.insert_challenge(&challenge).await.unwrap();

        let participation = ChallengeParticipation::new(challenge.challenge_id, "u1", 5, now);
        let joined = store.join_challenge(&participation).await.unwrap();
        assert_eq!(joined.participant_count, 1);

        let again = store.join_challenge(&participation).await;
        assert!(matches!(again, Err(StorageError::ConstraintViolation(_))));
        assert_eq!(
            store.get_challenge(challenge.challenge_id).await.unwrap().participant_count,
            1
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryLedgerStore::new();
        store.set_unavailable(true);

        let result = store.recent_transactions("u1", 10).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));

        store.set_unavailable(false);
        assert!(store.recent_transactions("u1", 10).await.unwrap().is_empty());
    }
}
