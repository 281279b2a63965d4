use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{Tier, UserProgress, XpEvent, XpTransaction};

/// Inbound trigger raised by the booking, review, referral or profile layers
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AwardXpRequest {
    #[validate(length(min = 1, max = 128, message = "userId must be between 1 and 128 characters"))]
    pub user_id: String,

    #[validate(custom(function = "validate_trigger"))]
    pub event: XpEvent,

    /// Idempotency key tying one real-world occurrence to one award.
    #[validate(length(min = 1, max = 255))]
    pub context_id: Option<String>,

    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

/// Manual XP correction issued by an operator
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AdjustXpRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,

    #[validate(custom(function = "validate_delta"))]
    pub delta: i64,

    #[validate(length(min = 1, max = 500, message = "A reason is required"))]
    pub reason: String,

    #[validate(length(min = 1, max = 128))]
    pub admin_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetTierRequest {
    pub tier: Tier,
}

/// Progress as seen at request time, with the daily counter rolled over
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProgressResponse {
    pub user_id: String,
    pub total_xp: i64,
    pub daily_xp: i64,
    pub daily_cap: i64,
    pub streak_days: i32,
    pub tier: Tier,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl UserProgressResponse {
    pub fn new(progress: &UserProgress, daily_cap: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: progress.user_id.clone(),
            total_xp: progress.total_xp,
            daily_xp: progress.daily_xp_at(now),
            daily_cap,
            streak_days: progress.streak_days,
            tier: progress.tier,
            last_activity_at: progress.last_activity_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdjustXpResponse {
    pub progress: UserProgressResponse,
    pub transaction: XpTransaction,
}

fn validate_trigger(event: &XpEvent) -> Result<(), validator::ValidationError> {
    if event.is_trigger() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("not_a_trigger_event"))
    }
}

fn validate_delta(delta: i64) -> Result<(), validator::ValidationError> {
    if delta == 0 {
        return Err(validator::ValidationError::new("zero_delta"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(event: XpEvent) -> AwardXpRequest {
        AwardXpRequest {
            user_id: "creator-1".to_string(),
            event,
            context_id: Some("booking-1".to_string()),
            metadata: None,
        }
    }

    #[test]
    fn test_system_events_are_not_accepted_as_triggers() {
        assert!(request(XpEvent::BookingCompleted).validate().is_ok());
        assert!(request(XpEvent::BadgeBonus).validate().is_err());
        assert!(request(XpEvent::AdminAdjustment).validate().is_err());
    }

    #[test]
    fn test_adjustment_requires_reason_and_delta() {
        let mut adjust = AdjustXpRequest {
            user_id: "creator-1".to_string(),
            delta: -50,
            reason: "refund".to_string(),
            admin_id: "ops".to_string(),
        };
        assert!(adjust.validate().is_ok());

        adjust.delta = 0;
        assert!(adjust.validate().is_err());

        adjust.delta = 10;
        adjust.reason.clear();
        assert!(adjust.validate().is_err());
    }

    #[test]
    fn test_progress_response_rolls_daily_counter() {
        let day_one = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut progress = UserProgress::new("creator-1", day_one);
        progress.apply_award(100, 300, day_one);

        let same_day = UserProgressResponse::new(&progress, 300, day_one);
        assert_eq!(same_day.daily_xp, 100);

        let next_day = UserProgressResponse::new(&progress, 300, day_one + chrono::Duration::days(1));
        assert_eq!(next_day.daily_xp, 0);
        assert_eq!(next_day.total_xp, 100);
    }
}
