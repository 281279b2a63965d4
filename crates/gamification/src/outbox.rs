//! Durable at-least-once follow-up queue.
//!
//! XP crediting is the transactional boundary. Everything that reacts to a
//! credit (badge checks, challenge progress, bonus and reward payouts) is
//! written to the outbox table and retried with exponential backoff until it
//! succeeds. Entries that fail permanently, or keep failing past the attempt
//! limit, stay behind as dead letters for operators.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use storage::LedgerStore;
use storage::models::{Reward, RewardTier, XpEvent};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

pub use storage::models::OutboxEntry;

use crate::clock::Clock;
use crate::error::{GamificationError, Result};

/// Entries claimed per pass.
const CLAIM_BATCH: usize = 100;
/// How long a claimed entry is hidden from other workers.
const CLAIM_LEASE: Duration = Duration::minutes(5);
const MAX_RETRY_DELAY: Duration = Duration::minutes(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FollowUp {
    BadgeCheck {
        user_id: String,
        trigger: Option<XpEvent>,
    },
    ChallengeProgress {
        user_id: String,
        event: XpEvent,
    },
    BadgeBonus {
        user_id: String,
        badge_id: String,
        xp: i64,
    },
    ChallengeReward {
        user_id: String,
        challenge_id: Uuid,
        tier: RewardTier,
        reward: Reward,
    },
}

impl FollowUp {
    pub fn user_id(&self) -> &str {
        match self {
            Self::BadgeCheck { user_id, .. }
            | Self::ChallengeProgress { user_id, .. }
            | Self::BadgeBonus { user_id, .. }
            | Self::ChallengeReward { user_id, .. } => user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadgeCheck { .. } => "badge_check",
            Self::ChallengeProgress { .. } => "challenge_progress",
            Self::BadgeBonus { .. } => "badge_bonus",
            Self::ChallengeReward { .. } => "challenge_reward",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct OutboxStats {
    /// Live entries in the table, due or waiting for a retry.
    pub pending: i64,
    /// Handled by this process since it started.
    pub processed: u64,
    /// Failed attempts in this process since it started.
    pub failed_attempts: u64,
    pub dead_lettered: i64,
}

/// Executes one follow-up. Implemented by the dispatcher that owns the
/// services.
#[async_trait]
pub trait FollowUpHandler: Send + Sync {
    async fn handle(&self, follow_up: &FollowUp) -> Result<()>;
}

/// When to give up on a follow-up and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base_delay.max(Duration::zero()),
        }
    }

    /// Wait after the `attempts`-th failure: the base delay, doubled for
    /// every earlier failure, never above fifteen minutes.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        (self.base_delay * (1i32 << exponent)).min(MAX_RETRY_DELAY)
    }

    /// Only transient failures are retried, and only below the limit.
    fn retry_at(
        &self,
        attempts: u32,
        error: &GamificationError,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        (error.is_transient() && attempts < self.max_attempts)
            .then(|| now + self.delay_after(attempts))
    }
}

/// What one claim-and-handle pass did.
#[derive(Debug, Clone, Copy, Default)]
struct Pass {
    claimed: usize,
    succeeded: usize,
    /// Entries whose outcome made it back to the store.
    settled: usize,
}

pub struct Outbox {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    notify: Notify,
    processed: AtomicU64,
    failed_attempts: AtomicU64,
}

impl Outbox {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            notify: Notify::new(),
            processed: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
        }
    }

    /// Persist a follow-up. The credit that produced it is already
    /// committed, so a failed write is logged rather than returned.
    pub async fn enqueue(&self, follow_up: FollowUp) {
        let kind = follow_up.kind();
        let user_id = follow_up.user_id();

        let payload = match serde_json::to_value(&follow_up) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(kind, user_id, error = %e, "Follow-up could not be serialized");
                return;
            }
        };

        match self
            .store
            .enqueue_follow_up(kind, user_id, &payload, self.clock.now())
            .await
        {
            Ok(id) => {
                tracing::debug!(id, kind, user_id, "Follow-up enqueued");
                self.notify.notify_one();
            }
            Err(e) => {
                tracing::error!(kind, user_id, error = %e, "Follow-up could not be queued");
            }
        }
    }

    pub async fn pending_len(&self) -> Result<i64> {
        Ok(self.store.count_follow_ups(false).await?)
    }

    pub async fn stats(&self) -> Result<OutboxStats> {
        Ok(OutboxStats {
            pending: self.store.count_follow_ups(false).await?,
            processed: self.processed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            dead_lettered: self.store.count_follow_ups(true).await?,
        })
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        Ok(self.store.dead_follow_ups(limit).await?)
    }

    /// Claim and handle one batch of entries that are due now. Returns the
    /// number of entries that succeeded.
    pub async fn process_pending(&self, handler: &dyn FollowUpHandler) -> usize {
        self.process(handler, Some(self.clock.now())).await.succeeded
    }

    /// Process until nothing live is left, ignoring backoff and leases,
    /// including follow-ups enqueued by the handlers themselves. Stops early
    /// when a pass cannot record any outcome.
    pub async fn drain(&self, handler: &dyn FollowUpHandler) -> usize {
        let mut succeeded = 0;
        loop {
            let pass = self.process(handler, None).await;
            succeeded += pass.succeeded;
            if pass.settled == 0 {
                break;
            }
        }
        succeeded
    }

    async fn process(&self, handler: &dyn FollowUpHandler, due_by: Option<DateTime<Utc>>) -> Pass {
        let now = self.clock.now();
        let batch = match self
            .store
            .claim_follow_ups(due_by, now + CLAIM_LEASE, CLAIM_BATCH)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim follow-ups");
                return Pass::default();
            }
        };

        let mut pass = Pass {
            claimed: batch.len(),
            ..Pass::default()
        };

        for entry in batch {
            let attempts = u32::try_from(entry.attempts).unwrap_or_default().saturating_add(1);
            let outcome = match serde_json::from_value::<FollowUp>(entry.payload.clone()) {
                Ok(follow_up) => handler.handle(&follow_up).await,
                Err(e) => Err(GamificationError::InvalidInput(format!("undecodable follow-up: {e}"))),
            };

            let recorded = match outcome {
                Ok(()) => {
                    pass.succeeded += 1;
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    self.store.delete_follow_up(entry.id).await
                }
                Err(e) => {
                    self.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    let retry_at = self.policy.retry_at(attempts, &e, now);
                    match retry_at {
                        Some(at) => tracing::warn!(
                            id = entry.id,
                            kind = %entry.kind,
                            attempts,
                            retry_at = %at,
                            error = %e,
                            "Follow-up failed, will retry"
                        ),
                        None => tracing::error!(
                            id = entry.id,
                            kind = %entry.kind,
                            user_id = %entry.user_id,
                            attempts,
                            transient = e.is_transient(),
                            error = %e,
                            "Follow-up dead-lettered"
                        ),
                    }
                    self.store
                        .record_follow_up_failure(entry.id, attempts as i32, &e.to_string(), retry_at)
                        .await
                }
            };

            match recorded {
                Ok(()) => pass.settled += 1,
                Err(e) => tracing::error!(
                    id = entry.id,
                    kind = %entry.kind,
                    error = %e,
                    "Follow-up outcome not recorded, it runs again after its lease"
                ),
            }
        }

        pass
    }

    /// Worker loop: wake on enqueue or every `idle`, stop on cancellation.
    pub async fn run(&self, handler: &dyn FollowUpHandler, idle: StdDuration, cancel: CancellationToken) {
        tracing::info!("Outbox worker started");

        loop {
            while self.process(handler, Some(self.clock.now())).await.claimed == CLAIM_BATCH {}

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }

        let remaining = self.pending_len().await.ok();
        tracing::info!(?remaining, "Outbox worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;
    use storage::{MemoryLedgerStore, OutboxStore, StorageError};

    struct FlakyHandler {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FlakyHandler {
        fn failing(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl FollowUpHandler for FlakyHandler {
        async fn handle(&self, _follow_up: &FollowUp) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(StorageError::Unavailable("flaky".to_string()).into());
            }
            Ok(())
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl FollowUpHandler for RejectingHandler {
        async fn handle(&self, _follow_up: &FollowUp) -> Result<()> {
            Err(GamificationError::ChallengeNotFound)
        }
    }

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        clock: Arc<ManualClock>,
        outbox: Outbox,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()));
        let outbox = Outbox::new(
            store.clone(),
            clock.clone(),
            RetryPolicy::new(max_attempts, Duration::seconds(2)),
        );
        Fixture { store, clock, outbox }
    }

    fn badge_check(user: &str) -> FollowUp {
        FollowUp::BadgeCheck {
            user_id: user.to_string(),
            trigger: Some(XpEvent::BookingCompleted),
        }
    }

    #[test]
    fn test_retry_delay_doubles_up_to_the_ceiling() {
        let policy = RetryPolicy::new(5, Duration::seconds(2));
        assert_eq!(policy.delay_after(1), Duration::seconds(2));
        assert_eq!(policy.delay_after(2), Duration::seconds(4));
        assert_eq!(policy.delay_after(4), Duration::seconds(16));
        assert_eq!(policy.delay_after(40), Duration::minutes(15));
    }

    #[tokio::test]
    async fn test_follow_up_survives_in_the_store() {
        let f = fixture(5);
        let reward = FollowUp::ChallengeReward {
            user_id: "creator-1".to_string(),
            challenge_id: Uuid::new_v4(),
            tier: RewardTier::Winner,
            reward: Reward {
                xp: 500,
                badge_id: Some("bookings_50".to_string()),
            },
        };
        f.outbox.enqueue(reward.clone()).await;

        // A second worker over the same store sees the entry.
        let other = Outbox::new(
            f.store.clone(),
            f.clock.clone(),
            RetryPolicy::new(5, Duration::seconds(2)),
        );
        assert_eq!(other.pending_len().await.unwrap(), 1);

        let claimed = f.store.claim_follow_ups(None, f.clock.now(), 1).await.unwrap();
        assert_eq!(claimed[0].kind, "challenge_reward");
        assert_eq!(serde_json::from_value::<FollowUp>(claimed[0].payload.clone()).unwrap(), reward);
    }

    #[tokio::test]
    async fn test_failed_entry_is_retried() {
        let f = fixture(5);
        let handler = FlakyHandler::failing(2);

        f.outbox.enqueue(badge_check("creator-1")).await;
        let succeeded = f.outbox.drain(&handler).await;

        assert_eq!(succeeded, 1);
        let stats = f.outbox.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.failed_attempts, 2);
        assert_eq!(stats.dead_lettered, 0);
    }

    #[tokio::test]
    async fn test_retries_wait_for_backoff() {
        let f = fixture(5);
        let handler = FlakyHandler::failing(2);
        f.outbox.enqueue(badge_check("creator-1")).await;

        assert_eq!(f.outbox.process_pending(&handler).await, 0);
        assert_eq!(f.outbox.process_pending(&handler).await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        f.clock.advance(Duration::seconds(2));
        assert_eq!(f.outbox.process_pending(&handler).await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        // Second failure doubles the wait.
        f.clock.advance(Duration::seconds(2));
        assert_eq!(f.outbox.process_pending(&handler).await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        f.clock.advance(Duration::seconds(2));
        assert_eq!(f.outbox.process_pending(&handler).await, 1);
        assert_eq!(f.outbox.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entry_is_dead_lettered_after_max_attempts() {
        let f = fixture(3);
        let handler = FlakyHandler::failing(usize::MAX);

        f.outbox.enqueue(badge_check("creator-1")).await;
        f.outbox.drain(&handler).await;

        let dead = f.outbox.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("Storage error: Store unavailable: flaky"));
        assert_eq!(f.outbox.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered_at_once() {
        let f = fixture(5);

        f.outbox.enqueue(badge_check("creator-1")).await;
        f.outbox.drain(&RejectingHandler).await;

        let stats = f.outbox.stats().await.unwrap();
        assert_eq!(stats.failed_attempts, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(f.outbox.dead_letters(10).await.unwrap()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dead_lettered() {
        let f = fixture(5);
        f.store
            .enqueue_follow_up("badge_check", "creator-1", &serde_json::json!({ "kind": "unknown" }), f.clock.now())
            .await
            .unwrap();

        let handler = FlakyHandler::failing(0);
        f.outbox.drain(&handler).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.outbox.stats().await.unwrap().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_store_outage_keeps_entries_queued() {
        let f = fixture(5);
        let handler = FlakyHandler::failing(0);
        f.outbox.enqueue(badge_check("creator-1")).await;

        f.store.set_unavailable(true);
        assert_eq!(f.outbox.drain(&handler).await, 0);
        f.store.set_unavailable(false);

        assert_eq!(f.outbox.pending_len().await.unwrap(), 1);
        assert_eq!(f.outbox.drain(&handler).await, 1);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let f = fixture(5);
        let outbox = Arc::new(f.outbox);
        let handler = Arc::new(FlakyHandler::failing(0));
        let cancel = CancellationToken::new();

        outbox.enqueue(badge_check("creator-1")).await;

        let worker = {
            let outbox = outbox.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                outbox
                    .run(handler.as_ref(), StdDuration::from_millis(10), cancel)
                    .await;
            })
        };

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        cancel.cancel();
        worker.await.unwrap();

        assert_eq!(outbox.stats().await.unwrap().processed, 1);
    }
}
