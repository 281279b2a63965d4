use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, QueryBuilder};

use crate::error::Result;
use crate::models::{LeaderboardCategory, RankingScore};

const SCORE_COLUMNS: &str = "user_id, score, xp_score, verification_score, tier_score, \
     performance_score, engagement_score, recency_score, updated_at";

#[derive(FromRow)]
struct RankingRow {
    user_id: String,
    score: f64,
    xp_score: f64,
    verification_score: f64,
    tier_score: f64,
    performance_score: f64,
    engagement_score: f64,
    recency_score: f64,
    updated_at: DateTime<Utc>,
}

impl From<RankingRow> for RankingScore {
    fn from(row: RankingRow) -> Self {
        Self {
            user_id: row.user_id,
            score: row.score,
            xp_score: row.xp_score,
            verification_score: row.verification_score,
            tier_score: row.tier_score,
            performance_score: row.performance_score,
            engagement_score: row.engagement_score,
            recency_score: row.recency_score,
            updated_at: row.updated_at,
        }
    }
}

pub struct RankingRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RankingRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a whole batch in one statement.
    pub async fn upsert_scores(&self, scores: &[RankingScore]) -> Result<()> {
        if scores.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::new(format!("INSERT INTO ranking_scores ({SCORE_COLUMNS}) "));
        query.push_values(scores, |mut row, score| {
            row.push_bind(&score.user_id)
                .push_bind(score.score)
                .push_bind(score.xp_score)
                .push_bind(score.verification_score)
                .push_bind(score.tier_score)
                .push_bind(score.performance_score)
                .push_bind(score.engagement_score)
                .push_bind(score.recency_score)
                .push_bind(score.updated_at);
        });
        query.push(
            r#"
            ON CONFLICT (user_id) DO UPDATE SET
                score = EXCLUDED.score,
                xp_score = EXCLUDED.xp_score,
                verification_score = EXCLUDED.verification_score,
                tier_score = EXCLUDED.tier_score,
                performance_score = EXCLUDED.performance_score,
                engagement_score = EXCLUDED.engagement_score,
                recency_score = EXCLUDED.recency_score,
                updated_at = EXCLUDED.updated_at
            "#,
        );

        query.build().execute(self.pool).await?;

        Ok(())
    }

    pub async fn find(&self, user_id: &str) -> Result<Option<RankingScore>> {
        let sql = format!("SELECT {SCORE_COLUMNS} FROM ranking_scores WHERE user_id = $1");
        let row: Option<RankingRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(RankingScore::from))
    }

    pub async fn top(&self, category: LeaderboardCategory, limit: usize) -> Result<Vec<RankingScore>> {
        let mut query = QueryBuilder::new(format!("SELECT {SCORE_COLUMNS} FROM ranking_scores ORDER BY "));
        query.push(category.as_column());
        query.push(" DESC, user_id ASC LIMIT ");
        query.push_bind(limit as i64);

        let rows: Vec<RankingRow> = query.build_query_as().fetch_all(self.pool).await?;

        Ok(rows.into_iter().map(RankingScore::from).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM ranking_scores")
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    pub async fn count_above(&self, score: &RankingScore) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM ranking_scores
            WHERE score > $1 OR (score = $1 AND user_id < $2)
            "#,
        )
        .bind(score.score)
        .bind(&score.user_id)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }
}
