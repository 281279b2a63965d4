use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use storage::models::{Severity, Tier, UserProgress, XpEvent, XpTransaction};
use storage::{AdjustmentCommand, AwardCommand, AwardCommit, LedgerStore};
use utoipa::ToSchema;
use uuid::Uuid;

use super::validator::AntiGamingValidator;
use crate::clock::Clock;
use crate::config::GamificationConfig;
use crate::error::{GamificationError, Result};
use crate::outbox::{FollowUp, Outbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AwardStatus {
    Credited,
    Duplicate,
    Rejected,
}

/// One inbound trigger.
#[derive(Debug, Clone)]
pub struct AwardRequest {
    pub user_id: String,
    pub event: XpEvent,
    pub context_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl AwardRequest {
    pub fn new(user_id: impl Into<String>, event: XpEvent) -> Self {
        Self {
            user_id: user_id.into(),
            event,
            context_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of an award attempt. Rejections and duplicates are values, not
/// errors.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AwardResult {
    pub status: AwardStatus,
    pub credited: i64,
    pub capped: bool,
    pub reason: Option<String>,
    pub severity: Option<Severity>,
    pub remaining_cooldown_secs: Option<i64>,
    pub transaction_id: Option<Uuid>,
    pub total_xp: Option<i64>,
}

impl AwardResult {
    fn credited(transaction: &XpTransaction, progress: &UserProgress) -> Self {
        Self {
            status: AwardStatus::Credited,
            credited: transaction.xp_amount,
            capped: transaction.capped,
            reason: transaction.capped.then(|| "daily_cap_reached".to_string()),
            severity: None,
            remaining_cooldown_secs: None,
            transaction_id: Some(transaction.transaction_id),
            total_xp: Some(progress.total_xp),
        }
    }

    fn duplicate(existing: &XpTransaction) -> Self {
        Self {
            status: AwardStatus::Duplicate,
            credited: 0,
            capped: false,
            reason: Some("duplicate_context".to_string()),
            severity: Some(Severity::Low),
            remaining_cooldown_secs: None,
            transaction_id: Some(existing.transaction_id),
            total_xp: None,
        }
    }

    fn rejected(reason: impl Into<String>, severity: Option<Severity>) -> Self {
        Self {
            status: AwardStatus::Rejected,
            credited: 0,
            capped: false,
            reason: Some(reason.into()),
            severity,
            remaining_cooldown_secs: None,
            transaction_id: None,
            total_xp: None,
        }
    }

    pub fn is_credited(&self) -> bool {
        self.status == AwardStatus::Credited
    }
}

pub struct XpAwardEngine {
    store: Arc<dyn LedgerStore>,
    validator: Arc<AntiGamingValidator>,
    outbox: Arc<Outbox>,
    clock: Arc<dyn Clock>,
    config: Arc<GamificationConfig>,
}

impl XpAwardEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        validator: Arc<AntiGamingValidator>,
        outbox: Arc<Outbox>,
        clock: Arc<dyn Clock>,
        config: Arc<GamificationConfig>,
    ) -> Self {
        Self {
            store,
            validator,
            outbox,
            clock,
            config,
        }
    }

    /// Award an inbound trigger event.
    ///
    /// A replayed `context_id` is checked before the validator so a retry
    /// is reported as a duplicate rather than as a cooldown hit. Only store
    /// failures surface as errors; the caller should retry those with the
    /// same `context_id`.
    pub async fn award(&self, request: AwardRequest) -> Result<AwardResult> {
        let Some(rule) = self.config.event_rules.get(request.event) else {
            tracing::warn!(
                user_id = %request.user_id,
                event = %request.event,
                "Event is not an inbound trigger, ignoring"
            );
            return Ok(AwardResult::rejected("unsupported_event", None));
        };

        if let Some(context_id) = request.context_id.as_deref()
            && let Some(existing) = self
                .store
                .find_transaction(&request.user_id, request.event, context_id)
                .await?
        {
            return Ok(self.on_duplicate(&request, context_id, &existing).await);
        }

        let validation = self
            .validator
            .validate(&request.user_id, request.event, request.context_id.as_deref())
            .await;
        if !validation.valid {
            let reason = validation.reason.unwrap_or_else(|| "rejected".to_string());
            tracing::warn!(
                user_id = %request.user_id,
                event = %request.event,
                reason = %reason,
                "Award rejected by validator"
            );
            let mut result = AwardResult::rejected(reason, validation.severity);
            result.remaining_cooldown_secs = validation.remaining_cooldown_secs;
            return Ok(result);
        }

        self.commit(request, rule.base_xp).await
    }

    /// Credit XP produced by the core itself (badge bonuses, challenge
    /// rewards). Skips the validator but still honours the daily cap and
    /// the idempotency key. The requested amount is kept in the ledger
    /// metadata as `requested_xp`; XP cut by the cap is not paid later.
    pub async fn award_system(
        &self,
        user_id: &str,
        event: XpEvent,
        xp: i64,
        context_id: &str,
        metadata: serde_json::Value,
    ) -> Result<AwardResult> {
        if event.is_trigger() || event == XpEvent::AdminAdjustment {
            return Err(GamificationError::InvalidInput(format!(
                "{event} is not a system award"
            )));
        }

        let metadata = match metadata {
            serde_json::Value::Object(mut fields) => {
                fields.insert("requested_xp".to_string(), json!(xp));
                serde_json::Value::Object(fields)
            }
            serde_json::Value::Null => json!({ "requested_xp": xp }),
            details => json!({ "requested_xp": xp, "details": details }),
        };

        let request = AwardRequest::new(user_id, event)
            .with_context(context_id)
            .with_metadata(metadata);
        let result = self.commit(request, xp).await?;

        if result.status == AwardStatus::Credited && result.credited < xp {
            tracing::warn!(
                user_id,
                event = %event,
                context_id,
                requested = xp,
                credited = result.credited,
                shortfall = xp - result.credited,
                "System award cut by daily cap"
            );
        }
        Ok(result)
    }

    async fn commit(&self, request: AwardRequest, base_xp: i64) -> Result<AwardResult> {
        let command = AwardCommand {
            user_id: request.user_id.clone(),
            event: request.event,
            base_xp,
            daily_cap: self.config.daily_cap,
            context_id: request.context_id.clone(),
            metadata: request.metadata.clone(),
            now: self.clock.now(),
        };

        match self.store.commit_award(&command).await? {
            AwardCommit::Committed {
                transaction,
                progress,
            } => {
                tracing::info!(
                    user_id = %transaction.user_id,
                    event = %transaction.event,
                    credited = transaction.xp_amount,
                    capped = transaction.capped,
                    total_xp = progress.total_xp,
                    "XP awarded"
                );

                if transaction.xp_amount > 0 {
                    self.outbox
                        .enqueue(FollowUp::BadgeCheck {
                            user_id: transaction.user_id.clone(),
                            trigger: Some(transaction.event),
                        })
                        .await;
                    self.outbox
                        .enqueue(FollowUp::ChallengeProgress {
                            user_id: transaction.user_id.clone(),
                            event: transaction.event,
                        })
                        .await;
                }

                Ok(AwardResult::credited(&transaction, &progress))
            }
            AwardCommit::Duplicate { existing } => {
                let context_id = request.context_id.as_deref().unwrap_or_default();
                Ok(self.on_duplicate(&request, context_id, &existing).await)
            }
        }
    }

    async fn on_duplicate(&self, request: &AwardRequest, context_id: &str, existing: &XpTransaction) -> AwardResult {
        tracing::warn!(
            user_id = %request.user_id,
            event = %request.event,
            context_id,
            "Duplicate award ignored"
        );
        if request.event.is_trigger() {
            self.validator
                .record_duplicate(&request.user_id, request.event, context_id)
                .await;
        }
        AwardResult::duplicate(existing)
    }

    /// Manual correction. Bypasses the validator and the daily cap and is
    /// recorded as an `admin_adjustment` transaction.
    pub async fn adjust(
        &self,
        user_id: &str,
        delta: i64,
        reason: &str,
        admin_id: &str,
    ) -> Result<(UserProgress, XpTransaction)> {
        if delta == 0 {
            return Err(GamificationError::InvalidInput("delta must not be zero".to_string()));
        }

        let command = AdjustmentCommand {
            user_id: user_id.to_string(),
            delta,
            reason: reason.to_string(),
            admin_id: admin_id.to_string(),
            now: self.clock.now(),
        };
        let (progress, transaction) = self.store.commit_adjustment(&command).await?;

        tracing::info!(
            user_id,
            admin_id,
            requested = delta,
            applied = transaction.xp_amount,
            total_xp = progress.total_xp,
            reason,
            "Admin XP adjustment"
        );

        if transaction.xp_amount > 0 {
            self.outbox
                .enqueue(FollowUp::BadgeCheck {
                    user_id: user_id.to_string(),
                    trigger: None,
                })
                .await;
        }

        Ok((progress, transaction))
    }

    pub async fn set_tier(&self, user_id: &str, tier: Tier) -> Result<UserProgress> {
        let progress = self.store.set_tier(user_id, tier, self.clock.now()).await?;
        tracing::info!(user_id, tier = %tier, "Tier updated");

        self.outbox
            .enqueue(FollowUp::BadgeCheck {
                user_id: user_id.to_string(),
                trigger: None,
            })
            .await;

        Ok(progress)
    }

    pub async fn progress(&self, user_id: &str) -> Result<Option<UserProgress>> {
        Ok(self.store.get_progress(user_id).await?)
    }

    pub async fn transactions(&self, user_id: &str, limit: usize) -> Result<Vec<XpTransaction>> {
        Ok(self.store.recent_transactions(user_id, limit).await?)
    }

    pub fn daily_cap(&self) -> i64 {
        self.config.daily_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::outbox::RetryPolicy;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use storage::models::AlertKind;
    use storage::{AlertStore, MemoryLedgerStore, XpLedger};

    struct Fixture {
        store: Arc<MemoryLedgerStore>,
        clock: Arc<ManualClock>,
        outbox: Arc<Outbox>,
        engine: XpAwardEngine,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 7, 14, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let outbox = Arc::new(Outbox::new(
            store.clone(),
            clock.clone(),
            RetryPolicy::new(5, Duration::seconds(2)),
        ));
        let config = Arc::new(GamificationConfig::default());
        let validator = Arc::new(AntiGamingValidator::new(
            store.clone(),
            clock.clone(),
            config.event_rules.clone(),
        ));
        let engine = XpAwardEngine::new(store.clone(), validator, outbox.clone(), clock.clone(), config);

        Fixture {
            store,
            clock,
            outbox,
            engine,
        }
    }

    #[tokio::test]
    async fn test_award_credits_base_xp_and_enqueues_follow_ups() {
        let f = fixture();

        let result = f
            .engine
            .award(AwardRequest::new("creator-1", XpEvent::BookingCompleted).with_context("booking-1"))
            .await
            .unwrap();

        assert_eq!(result.status, AwardStatus::Credited);
        assert_eq!(result.credited, 100);
        assert!(!result.capped);
        assert_eq!(result.total_xp, Some(100));
        assert_eq!(f.outbox.pending_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_award_near_cap_credits_remainder() {
        let f = fixture();

        f.engine
            .award_system("creator-1", XpEvent::BadgeBonus, 280, "warmup", serde_json::Value::Null)
            .await
            .unwrap();

        let result = f
            .engine
            .award(AwardRequest::new("creator-1", XpEvent::BookingCompleted).with_context("booking-1"))
            .await
            .unwrap();

        assert_eq!(result.credited, 20);
        assert!(result.capped);
        assert_eq!(result.reason.as_deref(), Some("daily_cap_reached"));

        let progress = f.engine.progress("creator-1").await.unwrap().unwrap();
        assert_eq!(progress.daily_xp, 300);
        assert_eq!(progress.total_xp, 300);
    }

    #[tokio::test]
    async fn test_capped_system_award_keeps_requested_amount() {
        let f = fixture();

        let result = f
            .engine
            .award_system(
                "creator-1",
                XpEvent::ChallengeReward,
                500,
                "challenge-1",
                serde_json::json!({ "tier": "winner" }),
            )
            .await
            .unwrap();

        assert_eq!(result.credited, 300);
        assert!(result.capped);

        let recorded = f.store.recent_transactions("creator-1", 1).await.unwrap();
        assert_eq!(recorded[0].metadata["requested_xp"], 500);
        assert_eq!(recorded[0].metadata["tier"], "winner");
        assert!(recorded[0].capped);
    }

    #[tokio::test]
    async fn test_award_at_cap_records_zero_credit() {
        let f = fixture();

        f.engine
            .award_system("creator-1", XpEvent::BadgeBonus, 300, "warmup", serde_json::Value::Null)
            .await
            .unwrap();
        let queued = f.outbox.pending_len().await.unwrap();

        let result = f
            .engine
            .award(AwardRequest::new("creator-1", XpEvent::FiveStarReview).with_context("review-1"))
            .await
            .unwrap();

        assert_eq!(result.status, AwardStatus::Credited);
        assert_eq!(result.credited, 0);
        assert!(result.capped);
        assert_eq!(f.store.transaction_count(), 2);
        assert_eq!(f.outbox.pending_len().await.unwrap(), queued);
    }

    #[tokio::test]
    async fn test_replayed_context_is_a_duplicate() {
        let f = fixture();
        let request = AwardRequest::new("creator-1", XpEvent::BookingCompleted).with_context("booking-1");

        let first = f.engine.award(request.clone()).await.unwrap();
        f.clock.advance(Duration::hours(3));
        let second = f.engine.award(request).await.unwrap();

        assert_eq!(second.status, AwardStatus::Duplicate);
        assert_eq!(second.credited, 0);
        assert_eq!(second.transaction_id, first.transaction_id);
        assert_eq!(f.store.transaction_count(), 1);

        let alerts = f.store.list_alerts(true, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SuspiciousPattern);
        assert_eq!(alerts[0].severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_second_review_within_cooldown_is_rejected() {
        let f = fixture();

        f.engine
            .award(AwardRequest::new("creator-1", XpEvent::FiveStarReview).with_context("review-1"))
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(10));

        let result = f
            .engine
            .award(AwardRequest::new("creator-1", XpEvent::FiveStarReview).with_context("review-2"))
            .await
            .unwrap();

        assert_eq!(result.status, AwardStatus::Rejected);
        assert_eq!(result.reason.as_deref(), Some("cooldown_active"));
        assert_eq!(result.remaining_cooldown_secs, Some(1200));
        assert_eq!(f.store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_system_event_is_not_a_trigger() {
        let f = fixture();

        let result = f
            .engine
            .award(AwardRequest::new("creator-1", XpEvent::BadgeBonus))
            .await
            .unwrap();

        assert_eq!(result.status, AwardStatus::Rejected);
        assert_eq!(result.reason.as_deref(), Some("unsupported_event"));
        assert_eq!(f.store.transaction_count(), 0);

        let misuse = f
            .engine
            .award_system("creator-1", XpEvent::BookingCompleted, 10, "x", serde_json::Value::Null)
            .await;
        assert!(matches!(misuse, Err(GamificationError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_adjustment_bypasses_cap_and_floors_at_zero() {
        let f = fixture();

        f.engine
            .award_system("creator-1", XpEvent::BadgeBonus, 300, "warmup", serde_json::Value::Null)
            .await
            .unwrap();

        let (progress, tx) = f.engine.adjust("creator-1", 500, "support ticket", "ops-1").await.unwrap();
        assert_eq!(progress.total_xp, 800);
        assert_eq!(progress.daily_xp, 300);
        assert_eq!(tx.event, XpEvent::AdminAdjustment);

        let (progress, tx) = f.engine.adjust("creator-1", -5000, "fraud", "ops-1").await.unwrap();
        assert_eq!(progress.total_xp, 0);
        assert_eq!(tx.xp_amount, -800);

        assert!(f.engine.adjust("creator-1", 0, "noop", "ops-1").await.is_err());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_error() {
        let f = fixture();
        f.store.set_unavailable(true);

        let result = f
            .engine
            .award(AwardRequest::new("creator-1", XpEvent::BookingCompleted).with_context("booking-1"))
            .await;

        assert!(matches!(result, Err(GamificationError::Storage(_))));
    }

    #[tokio::test]
    async fn test_set_tier_creates_progress_and_queues_badge_check() {
        let f = fixture();

        let progress = f.engine.set_tier("creator-1", Tier::Verified).await.unwrap();
        assert_eq!(progress.tier, Tier::Verified);
        assert_eq!(progress.total_xp, 0);
        assert_eq!(f.outbox.pending_len().await.unwrap(), 1);
    }
}
