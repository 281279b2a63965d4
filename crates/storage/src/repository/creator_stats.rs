use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::Result;
use crate::models::{EngagementStats, PerformanceStats, VerificationStatus};

#[derive(FromRow)]
struct VerificationRow {
    verified: bool,
    verified_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct PerformanceRow {
    avg_rating: f64,
    completed_bookings: i64,
    avg_response_time_hours: f64,
    cancellation_rate: f64,
}

#[derive(FromRow)]
struct EngagementRow {
    profile_views: i64,
    search_appearances: i64,
    conversion_rate: f64,
}

/// Read access to `creator_stats`. A missing row reads as zeroed stats.
pub struct CreatorStatsRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CreatorStatsRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn verification(&self, user_id: &str) -> Result<VerificationStatus> {
        let row: Option<VerificationRow> = sqlx::query_as(
            "SELECT verified, verified_at FROM creator_stats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row
            .map(|r| VerificationStatus {
                verified: r.verified,
                verified_at: r.verified_at,
            })
            .unwrap_or_default())
    }

    pub async fn performance(&self, user_id: &str) -> Result<PerformanceStats> {
        let row: Option<PerformanceRow> = sqlx::query_as(
            r#"
            SELECT avg_rating, completed_bookings, avg_response_time_hours, cancellation_rate
            FROM creator_stats
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row
            .map(|r| PerformanceStats {
                avg_rating: r.avg_rating,
                completed_bookings: r.completed_bookings,
                avg_response_time_hours: r.avg_response_time_hours,
                cancellation_rate: r.cancellation_rate,
            })
            .unwrap_or_default())
    }

    pub async fn engagement(&self, user_id: &str) -> Result<EngagementStats> {
        let row: Option<EngagementRow> = sqlx::query_as(
            r#"
            SELECT profile_views, search_appearances, conversion_rate
            FROM creator_stats
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row
            .map(|r| EngagementStats {
                profile_views: r.profile_views,
                search_appearances: r.search_appearances,
                conversion_rate: r.conversion_rate,
            })
            .unwrap_or_default())
    }
}
