use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Coarse reputation level. Ordering follows the progression
/// standard < verified < signature.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    #[default]
    Standard,
    Verified,
    Signature,
}

impl Tier {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Standard => 1.0,
            Self::Verified => 1.25,
            Self::Signature => 1.5,
        }
    }
}

/// Per-user XP aggregate. Created lazily on the first award and only ever
/// mutated inside a ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProgress {
    pub user_id: String,
    pub total_xp: i64,
    pub daily_xp: i64,
    pub last_award_date: Option<NaiveDate>,
    pub streak_days: i32,
    pub tier: Tier,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How much of an award actually landed on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditOutcome {
    pub credited: i64,
    pub capped: bool,
    /// Time the credit is booked at. Never earlier than the previous
    /// activity, so a stale request lands on the current day.
    pub credited_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            total_xp: 0,
            daily_xp: 0,
            last_award_date: None,
            streak_days: 0,
            tier: Tier::Standard,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credit up to `base_xp`, never letting `daily_xp` exceed `daily_cap`.
    ///
    /// The daily counter is reset lazily when `now` falls on a later UTC day
    /// than the previous award. A `now` older than the last activity is
    /// clamped forward to it, so the counter and date never move backwards.
    /// A fully capped award still succeeds with a zero credit.
    pub fn apply_award(&mut self, base_xp: i64, daily_cap: i64, now: DateTime<Utc>) -> CreditOutcome {
        let now = self.last_activity_at.map_or(now, |last| last.max(now));
        let today = match self.last_award_date {
            Some(last) if last > now.date_naive() => last,
            _ => now.date_naive(),
        };
        self.roll_day(today);

        let remaining = (daily_cap - self.daily_xp).max(0);
        let requested = base_xp.max(0);
        let credited = requested.min(remaining);

        self.daily_xp += credited;
        self.total_xp += credited;
        self.last_award_date = Some(today);
        self.last_activity_at = Some(now);
        self.updated_at = self.updated_at.max(now);

        CreditOutcome {
            credited,
            capped: credited < requested,
            credited_at: now,
        }
    }

    /// Admin correction. Leaves the daily counter untouched and floors the
    /// total at zero; returns the delta actually applied.
    pub fn apply_adjustment(&mut self, delta: i64, now: DateTime<Utc>) -> i64 {
        let before = self.total_xp;
        self.total_xp = before.saturating_add(delta).max(0);
        self.updated_at = now;
        self.total_xp - before
    }

    /// Daily XP as seen at `now`, accounting for a pending day rollover.
    pub fn daily_xp_at(&self, now: DateTime<Utc>) -> i64 {
        if self.last_award_date == Some(now.date_naive()) {
            self.daily_xp
        } else {
            0
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        match self.last_award_date {
            Some(last) if last == today => {}
            Some(last) if last.succ_opt() == Some(today) => {
                self.daily_xp = 0;
                self.streak_days += 1;
            }
            _ => {
                self.daily_xp = 0;
                self.streak_days = 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_partial_credit_at_cap() {
        let mut progress = UserProgress::new("u1", at(1, 9));
        progress.apply_award(280, 300, at(1, 9));

        let outcome = progress.apply_award(100, 300, at(1, 10));
        assert_eq!(outcome.credited, 20);
        assert!(outcome.capped);
        assert_eq!(progress.daily_xp, 300);
        assert_eq!(progress.total_xp, 300);
    }

    #[test]
    fn test_zero_credit_when_cap_reached() {
        let mut progress = UserProgress::new("u1", at(1, 9));
        progress.apply_award(300, 300, at(1, 9));

        let outcome = progress.apply_award(50, 300, at(1, 11));
        assert_eq!(outcome.credited, 0);
        assert!(outcome.capped);
        assert_eq!(progress.daily_xp, 300);
    }

    #[test]
    fn test_daily_counter_resets_on_new_day() {
        let mut progress = UserProgress::new("u1", at(1, 9));
        progress.apply_award(300, 300, at(1, 23));

        let outcome = progress.apply_award(100, 300, at(2, 0));
        assert_eq!(outcome.credited, 100);
        assert!(!outcome.capped);
        assert_eq!(outcome.credited_at, at(2, 0));
        assert_eq!(progress.daily_xp, 100);
        assert_eq!(progress.total_xp, 400);
    }

    #[test]
    fn test_stale_award_counts_against_the_current_day() {
        let mut progress = UserProgress::new("u1", at(1, 9));
        progress.apply_award(300, 300, at(1, 20));
        progress.apply_award(100, 300, at(2, 0));

        // Timestamp taken before midnight, committed after the day-2 award.
        let stale = progress.apply_award(300, 300, at(1, 23));
        assert_eq!(stale.credited, 200);
        assert!(stale.capped);
        assert_eq!(stale.credited_at, at(2, 0));
        assert_eq!(progress.daily_xp, 300);
        assert_eq!(progress.last_award_date, Some(at(2, 0).date_naive()));

        let next = progress.apply_award(300, 300, at(2, 1));
        assert_eq!(next.credited, 0);
        assert_eq!(progress.total_xp, 600);
        assert_eq!(progress.streak_days, 2);
    }

    #[test]
    fn test_streak_tracking() {
        let mut progress = UserProgress::new("u1", at(1, 9));
        progress.apply_award(10, 300, at(1, 9));
        progress.apply_award(10, 300, at(1, 15));
        assert_eq!(progress.streak_days, 1);

        progress.apply_award(10, 300, at(2, 9));
        assert_eq!(progress.streak_days, 2);

        progress.apply_award(10, 300, at(2, 9) + Duration::days(3));
        assert_eq!(progress.streak_days, 1);
    }

    #[test]
    fn test_adjustment_floors_total_and_keeps_daily() {
        let mut progress = UserProgress::new("u1", at(1, 9));
        progress.apply_award(120, 300, at(1, 9));

        assert_eq!(progress.apply_adjustment(-500, at(1, 10)), -120);
        assert_eq!(progress.total_xp, 0);
        assert_eq!(progress.daily_xp, 120);

        assert_eq!(progress.apply_adjustment(40, at(1, 11)), 40);
        assert_eq!(progress.total_xp, 40);
    }

    #[test]
    fn test_tier_ordering_and_multiplier() {
        assert!(Tier::Standard < Tier::Verified);
        assert!(Tier::Verified < Tier::Signature);
        assert_eq!(Tier::Signature.multiplier(), 1.5);
    }
}
