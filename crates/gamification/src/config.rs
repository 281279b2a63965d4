use std::collections::HashMap;
use std::str::FromStr;

use chrono::Duration;
use storage::models::XpEvent;

use crate::error::{GamificationError, Result};

/// Per-event award and anti-gaming limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRule {
    pub base_xp: i64,
    pub cooldown: Duration,
    pub max_per_hour: i64,
    pub max_per_day: i64,
}

impl EventRule {
    fn new(base_xp: i64, cooldown_minutes: i64, max_per_hour: i64, max_per_day: i64) -> Self {
        Self {
            base_xp,
            cooldown: Duration::minutes(cooldown_minutes),
            max_per_hour,
            max_per_day,
        }
    }
}

/// Rules for the inbound trigger events. System events have no entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRules {
    rules: HashMap<XpEvent, EventRule>,
}

impl Default for EventRules {
    fn default() -> Self {
        let rules = HashMap::from([
            (XpEvent::BookingCompleted, EventRule::new(100, 60, 5, 20)),
            (XpEvent::FiveStarReview, EventRule::new(50, 30, 10, 30)),
            (XpEvent::ReferralSignup, EventRule::new(75, 120, 3, 10)),
            (XpEvent::ReferralFirstBooking, EventRule::new(150, 120, 3, 10)),
            (XpEvent::ProfileCompleted, EventRule::new(200, 1440, 1, 1)),
            (XpEvent::TierReached, EventRule::new(250, 1440, 1, 3)),
        ]);
        Self { rules }
    }
}

impl EventRules {
    pub fn get(&self, event: XpEvent) -> Option<&EventRule> {
        self.rules.get(&event)
    }

    pub fn set(&mut self, event: XpEvent, rule: EventRule) {
        self.rules.insert(event, rule);
    }
}

/// Weights of the composite ranking score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub xp: f64,
    pub verification: f64,
    pub tier: f64,
    pub performance: f64,
    pub engagement: f64,
    pub recency: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            xp: 0.40,
            verification: 0.15,
            tier: 0.10,
            performance: 0.25,
            engagement: 0.05,
            recency: 0.05,
        }
    }
}

impl RankingWeights {
    fn validate(&self) -> Result<()> {
        let weights = [
            self.xp,
            self.verification,
            self.tier,
            self.performance,
            self.engagement,
            self.recency,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(GamificationError::Config(
                "ranking weights must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GamificationConfig {
    pub daily_cap: i64,
    pub ranking_batch_size: usize,
    pub ranking_weights: RankingWeights,
    pub challenge_leaderboard_size: usize,
    pub badge_catalog_ttl: Duration,
    pub outbox_max_attempts: u32,
    /// Delay before the first retry of a failed follow-up; doubles per
    /// further failure.
    pub outbox_retry_base: Duration,
    pub event_rules: EventRules,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            daily_cap: 300,
            ranking_batch_size: 100,
            ranking_weights: RankingWeights::default(),
            challenge_leaderboard_size: 50,
            badge_catalog_ttl: Duration::seconds(300),
            outbox_max_attempts: 5,
            outbox_retry_base: Duration::seconds(2),
            event_rules: EventRules::default(),
        }
    }
}

impl GamificationConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let weights = defaults.ranking_weights;

        let config = Self {
            daily_cap: parse_or(&lookup, "XP_DAILY_CAP", defaults.daily_cap)?,
            ranking_batch_size: parse_or(&lookup, "RANKING_BATCH_SIZE", defaults.ranking_batch_size)?,
            ranking_weights: RankingWeights {
                xp: parse_or(&lookup, "RANKING_WEIGHT_XP", weights.xp)?,
                verification: parse_or(&lookup, "RANKING_WEIGHT_VERIFICATION", weights.verification)?,
                tier: parse_or(&lookup, "RANKING_WEIGHT_TIER", weights.tier)?,
                performance: parse_or(&lookup, "RANKING_WEIGHT_PERFORMANCE", weights.performance)?,
                engagement: parse_or(&lookup, "RANKING_WEIGHT_ENGAGEMENT", weights.engagement)?,
                recency: parse_or(&lookup, "RANKING_WEIGHT_RECENCY", weights.recency)?,
            },
            challenge_leaderboard_size: parse_or(
                &lookup,
                "CHALLENGE_LEADERBOARD_SIZE",
                defaults.challenge_leaderboard_size,
            )?,
            badge_catalog_ttl: Duration::seconds(parse_or(
                &lookup,
                "BADGE_CATALOG_TTL_SECS",
                defaults.badge_catalog_ttl.num_seconds(),
            )?),
            outbox_max_attempts: parse_or(&lookup, "OUTBOX_MAX_ATTEMPTS", defaults.outbox_max_attempts)?,
            outbox_retry_base: Duration::seconds(parse_or(
                &lookup,
                "OUTBOX_RETRY_BASE_SECS",
                defaults.outbox_retry_base.num_seconds(),
            )?),
            event_rules: defaults.event_rules,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.daily_cap <= 0 {
            return Err(GamificationError::Config("XP_DAILY_CAP must be positive".to_string()));
        }
        if self.ranking_batch_size == 0 {
            return Err(GamificationError::Config(
                "RANKING_BATCH_SIZE must be positive".to_string(),
            ));
        }
        if self.challenge_leaderboard_size == 0 {
            return Err(GamificationError::Config(
                "CHALLENGE_LEADERBOARD_SIZE must be positive".to_string(),
            ));
        }
        if self.outbox_max_attempts == 0 {
            return Err(GamificationError::Config(
                "OUTBOX_MAX_ATTEMPTS must be positive".to_string(),
            ));
        }
        if self.outbox_retry_base < Duration::zero() {
            return Err(GamificationError::Config(
                "OUTBOX_RETRY_BASE_SECS must not be negative".to_string(),
            ));
        }
        if self.badge_catalog_ttl < Duration::zero() {
            return Err(GamificationError::Config(
                "BADGE_CATALOG_TTL_SECS must not be negative".to_string(),
            ));
        }
        self.ranking_weights.validate()
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GamificationError::Config(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = GamificationConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.daily_cap, 300);
        assert_eq!(config.ranking_batch_size, 100);
        assert_eq!(config.challenge_leaderboard_size, 50);
        assert_eq!(config.outbox_max_attempts, 5);
        assert_eq!(config.outbox_retry_base, Duration::seconds(2));
        assert_eq!(config.ranking_weights, RankingWeights::default());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = GamificationConfig::from_lookup(lookup_from(&[
            ("XP_DAILY_CAP", "500"),
            ("RANKING_WEIGHT_XP", "0.6"),
            ("BADGE_CATALOG_TTL_SECS", "60"),
            ("OUTBOX_RETRY_BASE_SECS", "10"),
        ]))
        .unwrap();

        assert_eq!(config.outbox_retry_base, Duration::seconds(10));

        assert_eq!(config.daily_cap, 500);
        assert_eq!(config.ranking_weights.xp, 0.6);
        assert_eq!(config.badge_catalog_ttl, Duration::seconds(60));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let garbage = GamificationConfig::from_lookup(lookup_from(&[("XP_DAILY_CAP", "lots")]));
        assert!(matches!(garbage, Err(GamificationError::Config(_))));

        let zero_cap = GamificationConfig::from_lookup(lookup_from(&[("XP_DAILY_CAP", "0")]));
        assert!(zero_cap.is_err());

        let negative_weight =
            GamificationConfig::from_lookup(lookup_from(&[("RANKING_WEIGHT_TIER", "-0.1")]));
        assert!(negative_weight.is_err());
    }

    #[test]
    fn test_default_event_rules() {
        let rules = EventRules::default();

        let review = rules.get(XpEvent::FiveStarReview).unwrap();
        assert_eq!(review.base_xp, 50);
        assert_eq!(review.cooldown, Duration::minutes(30));

        let booking = rules.get(XpEvent::BookingCompleted).unwrap();
        assert_eq!((booking.max_per_hour, booking.max_per_day), (5, 20));

        assert!(rules.get(XpEvent::BadgeBonus).is_none());
        assert!(rules.get(XpEvent::AdminAdjustment).is_none());
    }
}
