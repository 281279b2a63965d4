use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

/// Everything that can move a user's XP ledger.
///
/// The first six variants are inbound triggers raised by the booking,
/// review, referral and profile layers. The remaining ones are produced by
/// the core itself and never pass through the anti-gaming validator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum XpEvent {
    BookingCompleted,
    FiveStarReview,
    ReferralSignup,
    ReferralFirstBooking,
    ProfileCompleted,
    TierReached,
    BadgeBonus,
    ChallengeReward,
    AdminAdjustment,
}

impl XpEvent {
    pub const TRIGGERS: [XpEvent; 6] = [
        XpEvent::BookingCompleted,
        XpEvent::FiveStarReview,
        XpEvent::ReferralSignup,
        XpEvent::ReferralFirstBooking,
        XpEvent::ProfileCompleted,
        XpEvent::TierReached,
    ];

    /// Whether the event can be raised by an external caller.
    pub fn is_trigger(&self) -> bool {
        Self::TRIGGERS.contains(self)
    }

    pub fn is_referral(&self) -> bool {
        matches!(self, Self::ReferralSignup | Self::ReferralFirstBooking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(XpEvent::BookingCompleted.to_string(), "booking_completed");
        assert_eq!(XpEvent::FiveStarReview.as_ref(), "five_star_review");
        assert_eq!(
            XpEvent::from_str("referral_first_booking").unwrap(),
            XpEvent::ReferralFirstBooking
        );
        assert!(XpEvent::from_str("bookingCompleted").is_err());
    }

    #[test]
    fn test_system_events_are_not_triggers() {
        assert!(XpEvent::TierReached.is_trigger());
        assert!(!XpEvent::BadgeBonus.is_trigger());
        assert!(!XpEvent::ChallengeReward.is_trigger());
        assert!(!XpEvent::AdminAdjustment.is_trigger());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&XpEvent::ProfileCompleted).unwrap();
        assert_eq!(json, "\"profile_completed\"");
    }
}
