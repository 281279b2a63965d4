use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, QueryBuilder};

use super::parse_text;
use crate::error::{Result, StorageError};
use crate::models::{BadgeDefinition, UserBadge};

#[derive(FromRow)]
struct DefinitionRow {
    badge_id: String,
    name: String,
    description: String,
    category: String,
    rarity: String,
    criterion: serde_json::Value,
    xp_reward: Option<i64>,
    active: bool,
}

impl TryFrom<DefinitionRow> for BadgeDefinition {
    type Error = StorageError;

    fn try_from(row: DefinitionRow) -> Result<Self> {
        Ok(Self {
            category: parse_text(&row.category, "category")?,
            rarity: parse_text(&row.rarity, "rarity")?,
            criterion: serde_json::from_value(row.criterion)?,
            badge_id: row.badge_id,
            name: row.name,
            description: row.description,
            xp_reward: row.xp_reward,
            active: row.active,
        })
    }
}

#[derive(FromRow)]
struct UserBadgeRow {
    user_id: String,
    badge_id: String,
    awarded_at: DateTime<Utc>,
    metadata: serde_json::Value,
}

impl From<UserBadgeRow> for UserBadge {
    fn from(row: UserBadgeRow) -> Self {
        Self {
            user_id: row.user_id,
            badge_id: row.badge_id,
            awarded_at: row.awarded_at,
            metadata: row.metadata,
        }
    }
}

pub struct BadgeRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> BadgeRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_definitions(&self) -> Result<Vec<BadgeDefinition>> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(
            r#"
            SELECT badge_id, name, description, category, rarity, criterion, xp_reward, active
            FROM badge_definitions
            ORDER BY badge_id
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(BadgeDefinition::try_from).collect()
    }

    pub async fn insert_definitions(&self, definitions: &[BadgeDefinition]) -> Result<u64> {
        if definitions.is_empty() {
            return Ok(0);
        }

        let criteria = definitions
            .iter()
            .map(|d| serde_json::to_value(&d.criterion))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut query = QueryBuilder::new(
            "INSERT INTO badge_definitions \
             (badge_id, name, description, category, rarity, criterion, xp_reward, active) ",
        );
        query.push_values(
            definitions.iter().zip(criteria),
            |mut row, (definition, criterion)| {
                row.push_bind(&definition.badge_id)
                    .push_bind(&definition.name)
                    .push_bind(&definition.description)
                    .push_bind(definition.category.as_ref())
                    .push_bind(definition.rarity.as_ref())
                    .push_bind(criterion)
                    .push_bind(definition.xp_reward)
                    .push_bind(definition.active);
            },
        );
        query.push(" ON CONFLICT (badge_id) DO NOTHING");

        let result = query.build().execute(self.pool).await?;

        Ok(result.rows_affected())
    }

    pub async fn user_badges(&self, user_id: &str) -> Result<Vec<UserBadge>> {
        let rows: Vec<UserBadgeRow> = sqlx::query_as(
            r#"
            SELECT user_id, badge_id, awarded_at, metadata
            FROM user_badges
            WHERE user_id = $1
            ORDER BY awarded_at
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(UserBadge::from).collect())
    }

    /// Existence is re-checked under the transaction and the primary key
    /// rejects a concurrent writer that slipped past the check.
    pub async fn try_award(&self, badge: &UserBadge) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let held: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_badges WHERE user_id = $1 AND badge_id = $2)",
        )
        .bind(&badge.user_id)
        .bind(&badge.badge_id)
        .fetch_one(&mut *tx)
        .await?;

        if held {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO user_badges (user_id, badge_id, awarded_at, metadata)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, badge_id) DO NOTHING
            "#,
        )
        .bind(&badge.user_id)
        .bind(&badge.badge_id)
        .bind(badge.awarded_at)
        .bind(&badge.metadata)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn award_counts(&self) -> Result<Vec<(String, i64)>> {
        let counts = sqlx::query_as(
            r#"
            SELECT badge_id, COUNT(*) AS awarded
            FROM user_badges
            GROUP BY badge_id
            ORDER BY badge_id
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(counts)
    }
}
