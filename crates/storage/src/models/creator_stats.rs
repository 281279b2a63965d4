//! Read-only inputs owned by the profile, booking and analytics layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VerificationStatus {
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PerformanceStats {
    pub avg_rating: f64,
    pub completed_bookings: i64,
    pub avg_response_time_hours: f64,
    /// Fraction in `[0, 1]`.
    pub cancellation_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EngagementStats {
    pub profile_views: i64,
    pub search_appearances: i64,
    /// Fraction in `[0, 1]`.
    pub conversion_rate: f64,
}
