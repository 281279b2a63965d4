//! Anti-gaming pre-flight checks.
//!
//! Checks run in order: per-event cooldown, hourly and daily ceilings, then
//! a behavioural suspicion score over the user's recent history. Any
//! internal failure lets the award through.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use serde_json::json;
use storage::LedgerStore;
use storage::models::{AlertKind, Severity, ValidationAlert, XpEvent, XpTransaction};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::config::EventRules;
use crate::error::Result;

/// How many of the latest transactions the suspicion score looks at.
pub const SUSPICION_WINDOW: usize = 50;
/// Fewer transactions than this never score.
pub const SUSPICION_MIN_SAMPLE: usize = 5;

const SPACING_MEAN_SECS: f64 = 300.0;
const SPACING_MAX_CV: f64 = 0.2;
const BURST_PER_HOUR: usize = 10;
const NIGHT_SHARE: f64 = 0.3;
const NIGHT_HOURS: std::ops::Range<u32> = 2..5;
const MIN_CONTEXT_UNIQUENESS: f64 = 0.5;

const BLOCK_CRITICAL: u32 = 70;
const BLOCK_HIGH: u32 = 50;
const SOFT_FLAG: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<String>,
    pub severity: Option<Severity>,
    pub remaining_cooldown_secs: Option<i64>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
            severity: None,
            remaining_cooldown_secs: None,
        }
    }

    fn rejected(reason: impl Into<String>, severity: Severity) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            severity: Some(severity),
            remaining_cooldown_secs: None,
        }
    }
}

/// Result of the behavioural heuristics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuspicionReport {
    pub score: u32,
    pub signals: Vec<&'static str>,
}

impl SuspicionReport {
    fn add(&mut self, points: u32, signal: &'static str) {
        self.score += points;
        self.signals.push(signal);
    }
}

/// Score a user's recent transactions. `recent` may be in any order.
pub fn suspicion_score(recent: &[XpTransaction], now: DateTime<Utc>) -> SuspicionReport {
    let mut report = SuspicionReport::default();
    if recent.len() < SUSPICION_MIN_SAMPLE {
        return report;
    }

    let mut times: Vec<DateTime<Utc>> = recent.iter().map(|tx| tx.created_at).collect();
    times.sort();

    let intervals: Vec<f64> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
        .collect();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };
    if mean < SPACING_MEAN_SECS && cv < SPACING_MAX_CV {
        report.add(30, "regular_spacing");
    }

    let hour_ago = now - Duration::hours(1);
    if times.iter().filter(|t| **t > hour_ago).count() > BURST_PER_HOUR {
        report.add(25, "hourly_burst");
    }

    let nocturnal = times.iter().filter(|t| NIGHT_HOURS.contains(&t.hour())).count();
    if nocturnal as f64 / times.len() as f64 > NIGHT_SHARE {
        report.add(15, "nocturnal_activity");
    }

    let keyed: Vec<&str> = recent.iter().filter_map(|tx| tx.context_id.as_deref()).collect();
    if keyed.len() >= SUSPICION_MIN_SAMPLE {
        let unique: HashSet<&str> = keyed.iter().copied().collect();
        if (unique.len() as f64 / keyed.len() as f64) < MIN_CONTEXT_UNIQUENESS {
            report.add(20, "repeated_context_ids");
        }
    }

    report
}

pub struct AntiGamingValidator {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    rules: EventRules,
}

impl AntiGamingValidator {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, rules: EventRules) -> Self {
        Self { store, clock, rules }
    }

    /// Never fails: an internal error is logged and the award allowed.
    pub async fn validate(&self, user_id: &str, event: XpEvent, context_id: Option<&str>) -> ValidationOutcome {
        match self.check(user_id, event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    user_id,
                    event = %event,
                    context_id,
                    error = %e,
                    "Validator failed, allowing award"
                );
                ValidationOutcome::valid()
            }
        }
    }

    async fn check(&self, user_id: &str, event: XpEvent) -> Result<ValidationOutcome> {
        let Some(rule) = self.rules.get(event) else {
            return Ok(ValidationOutcome::valid());
        };
        let now = self.clock.now();

        let same_event_today = self
            .store
            .transactions_between(user_id, Some(event), now - Duration::days(1), now)
            .await?;

        if let Some(last) = same_event_today.last() {
            let elapsed = now - last.created_at;
            if elapsed < rule.cooldown {
                let remaining = (rule.cooldown - elapsed).num_seconds();
                self.raise(
                    user_id,
                    AlertKind::CooldownViolation,
                    Severity::Medium,
                    event,
                    json!({ "remaining_seconds": remaining }),
                )
                .await;

                let mut outcome = ValidationOutcome::rejected("cooldown_active", Severity::Medium);
                outcome.remaining_cooldown_secs = Some(remaining);
                return Ok(outcome);
            }
        }

        let hour_ago = now - Duration::hours(1);
        let last_hour = same_event_today.iter().filter(|tx| tx.created_at >= hour_ago).count() as i64;
        let last_day = same_event_today.len() as i64;
        if last_hour >= rule.max_per_hour || last_day >= rule.max_per_day {
            self.raise(
                user_id,
                AlertKind::RateLimitExceeded,
                Severity::High,
                event,
                json!({
                    "last_hour": last_hour,
                    "max_per_hour": rule.max_per_hour,
                    "last_day": last_day,
                    "max_per_day": rule.max_per_day,
                }),
            )
            .await;
            return Ok(ValidationOutcome::rejected("rate_limit_exceeded", Severity::High));
        }

        let recent: Vec<XpTransaction> = self
            .store
            .recent_transactions(user_id, SUSPICION_WINDOW)
            .await?
            .into_iter()
            .filter(|tx| tx.event.is_trigger())
            .collect();
        let report = suspicion_score(&recent, now);

        let severity = match report.score {
            s if s >= BLOCK_CRITICAL => Severity::Critical,
            s if s >= BLOCK_HIGH => Severity::High,
            s if s >= SOFT_FLAG => Severity::Medium,
            _ => return Ok(ValidationOutcome::valid()),
        };
        let blocked = report.score >= BLOCK_HIGH;

        self.raise(
            user_id,
            AlertKind::SuspiciousPattern,
            severity,
            event,
            json!({
                "score": report.score,
                "signals": report.signals,
                "blocked": blocked,
            }),
        )
        .await;

        if blocked {
            Ok(ValidationOutcome::rejected("suspicious_pattern", severity))
        } else {
            tracing::warn!(user_id, score = report.score, signals = ?report.signals, "Suspicious activity flagged");
            Ok(ValidationOutcome::valid())
        }
    }

    /// Record a replayed idempotency key so operators can see retry storms.
    pub async fn record_duplicate(&self, user_id: &str, event: XpEvent, context_id: &str) {
        self.raise(
            user_id,
            AlertKind::SuspiciousPattern,
            Severity::Low,
            event,
            json!({ "reason": "duplicate_context", "context_id": context_id }),
        )
        .await;
    }

    async fn raise(
        &self,
        user_id: &str,
        kind: AlertKind,
        severity: Severity,
        event: XpEvent,
        details: serde_json::Value,
    ) {
        let alert = ValidationAlert::new(user_id, kind, severity, event, details, self.clock.now());
        tracing::warn!(user_id, kind = %kind, severity = %severity, event = %event, "Validation alert raised");

        if let Err(e) = self.store.insert_alert(&alert).await {
            tracing::error!(user_id, kind = %kind, error = %e, "Failed to store validation alert");
        }
    }

    pub async fn list_alerts(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ValidationAlert>> {
        Ok(self.store.list_alerts(unresolved_only, limit).await?)
    }

    pub async fn resolve_alert(&self, alert_id: uuid::Uuid, admin_id: &str) -> Result<ValidationAlert> {
        let alert = self
            .store
            .resolve_alert(alert_id, admin_id, self.clock.now())
            .await?;
        tracing::info!(alert_id = %alert_id, admin_id, "Validation alert resolved");
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use storage::{AlertStore, AwardCommand, MemoryLedgerStore, XpLedger};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 12, hour, minute, 0).unwrap()
    }

    fn tx(event: XpEvent, context: Option<&str>, created_at: DateTime<Utc>) -> XpTransaction {
        XpTransaction::new(
            "creator-1",
            event,
            10,
            context.map(str::to_string),
            serde_json::Value::Null,
            false,
            created_at,
        )
    }

    async fn record(store: &MemoryLedgerStore, event: XpEvent, context: &str, now: DateTime<Utc>) {
        store
            .commit_award(&AwardCommand {
                user_id: "creator-1".to_string(),
                event,
                base_xp: 50,
                daily_cap: 10_000,
                context_id: Some(context.to_string()),
                metadata: serde_json::Value::Null,
                now,
            })
            .await
            .unwrap();
    }

    fn validator(store: Arc<MemoryLedgerStore>, clock: Arc<ManualClock>) -> AntiGamingValidator {
        AntiGamingValidator::new(store, clock, EventRules::default())
    }

    #[test]
    fn test_small_history_never_scores() {
        let history: Vec<XpTransaction> = (0..4)
            .map(|i| tx(XpEvent::BookingCompleted, None, at(12, i)))
            .collect();
        assert_eq!(suspicion_score(&history, at(12, 10)).score, 0);
    }

    #[test]
    fn test_metronome_spacing_and_burst() {
        let history: Vec<XpTransaction> = (0..12)
            .map(|i| tx(XpEvent::FiveStarReview, None, at(12, i * 2)))
            .collect();
        let report = suspicion_score(&history, at(12, 30));

        assert!(report.signals.contains(&"regular_spacing"));
        assert!(report.signals.contains(&"hourly_burst"));
        assert_eq!(report.score, 55);
    }

    #[test]
    fn test_nocturnal_and_repeated_contexts() {
        let history: Vec<XpTransaction> = [(1, 0), (2, 30), (3, 10), (4, 45), (9, 0), (15, 20)]
            .into_iter()
            .map(|(h, m)| tx(XpEvent::ReferralSignup, Some("same-ref"), at(h, m)))
            .collect();
        let report = suspicion_score(&history, at(20, 0));

        assert!(report.signals.contains(&"nocturnal_activity"));
        assert!(report.signals.contains(&"repeated_context_ids"));
        assert!(!report.signals.contains(&"regular_spacing"));
        assert_eq!(report.score, 35);
    }

    #[tokio::test]
    async fn test_review_cooldown_reports_remaining_seconds() {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        let validator = validator(store.clone(), clock.clone());

        record(&store, XpEvent::FiveStarReview, "review-1", at(10, 0)).await;
        clock.set(at(10, 10));

        let outcome = validator
            .validate("creator-1", XpEvent::FiveStarReview, Some("review-2"))
            .await;

        assert!(!outcome.valid);
        assert_eq!(outcome.severity, Some(Severity::Medium));
        assert_eq!(outcome.remaining_cooldown_secs, Some(1200));

        let alerts = store.list_alerts(true, 10).await.unwrap();
        assert_eq!(alerts[0].kind, AlertKind::CooldownViolation);
    }

    #[tokio::test]
    async fn test_cooldown_elapsed_is_valid() {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        let validator = validator(store.clone(), clock.clone());

        record(&store, XpEvent::FiveStarReview, "review-1", at(10, 0)).await;
        clock.set(at(10, 31));

        let outcome = validator
            .validate("creator-1", XpEvent::FiveStarReview, Some("review-2"))
            .await;
        assert!(outcome.valid);
    }

    #[tokio::test]
    async fn test_daily_ceiling_is_high_severity() {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(at(0, 0)));
        let validator = validator(store.clone(), clock.clone());

        record(&store, XpEvent::ProfileCompleted, "profile", at(0, 0)).await;
        // Zero cooldown so only the daily ceiling applies.
        let mut rules = EventRules::default();
        rules.set(
            XpEvent::ProfileCompleted,
            crate::config::EventRule {
                base_xp: 200,
                cooldown: Duration::zero(),
                max_per_hour: 5,
                max_per_day: 1,
            },
        );
        let validator_with_rules = AntiGamingValidator::new(store.clone(), clock.clone(), rules);
        clock.set(at(6, 0));

        let outcome = validator_with_rules
            .validate("creator-1", XpEvent::ProfileCompleted, None)
            .await;
        assert!(!outcome.valid);
        assert_eq!(outcome.severity, Some(Severity::High));
        assert_eq!(outcome.reason.as_deref(), Some("rate_limit_exceeded"));

        let default_outcome = validator.validate("creator-1", XpEvent::ProfileCompleted, None).await;
        assert_eq!(default_outcome.reason.as_deref(), Some("cooldown_active"));
    }

    /// `count` trigger events two minutes apart from noon, spread over
    /// distinct events so every idempotency key is fresh.
    async fn seed_history(store: &MemoryLedgerStore, count: u32, shared_contexts: bool) {
        let events = [
            XpEvent::FiveStarReview,
            XpEvent::ReferralSignup,
            XpEvent::ReferralFirstBooking,
            XpEvent::ProfileCompleted,
            XpEvent::TierReached,
        ];
        for i in 0..count {
            let event = events[i as usize % events.len()];
            let context = if shared_contexts {
                format!("ctx-{}", i as usize / events.len())
            } else {
                format!("ctx-{i}")
            };
            record(store, event, &context, at(12, i * 2)).await;
        }
    }

    async fn validate_booking(store: Arc<MemoryLedgerStore>) -> ValidationOutcome {
        let clock = Arc::new(ManualClock::new(at(12, 30)));
        validator(store, clock)
            .validate("creator-1", XpEvent::BookingCompleted, Some("booking-1"))
            .await
    }

    #[tokio::test]
    async fn test_critical_suspicion_blocks() {
        let store = Arc::new(MemoryLedgerStore::new());
        seed_history(&store, 12, true).await;

        let outcome = validate_booking(store.clone()).await;
        assert!(!outcome.valid);
        assert_eq!(outcome.severity, Some(Severity::Critical));
        assert_eq!(outcome.reason.as_deref(), Some("suspicious_pattern"));

        let alerts = store.list_alerts(true, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SuspiciousPattern);
        assert_eq!(alerts[0].details["score"], 75);
        assert_eq!(alerts[0].details["blocked"], true);
    }

    #[tokio::test]
    async fn test_high_suspicion_blocks() {
        let store = Arc::new(MemoryLedgerStore::new());
        seed_history(&store, 12, false).await;

        let outcome = validate_booking(store.clone()).await;
        assert!(!outcome.valid);
        assert_eq!(outcome.severity, Some(Severity::High));

        let alerts = store.list_alerts(true, 10).await.unwrap();
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].details["score"], 55);
    }

    #[tokio::test]
    async fn test_moderate_suspicion_is_flagged_but_allowed() {
        let store = Arc::new(MemoryLedgerStore::new());
        seed_history(&store, 6, false).await;

        let outcome = validate_booking(store.clone()).await;
        assert!(outcome.valid);
        assert_eq!(outcome.severity, None);

        let alerts = store.list_alerts(true, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].details["score"], 30);
        assert_eq!(alerts[0].details["blocked"], false);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        let validator = validator(store.clone(), clock);

        store.set_unavailable(true);
        let outcome = validator
            .validate("creator-1", XpEvent::BookingCompleted, Some("booking-1"))
            .await;
        assert!(outcome.valid);
    }
}
