use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::{Result, StorageError};
use crate::models::OutboxEntry;

const OUTBOX_COLUMNS: &str =
    "id, kind, user_id, payload, attempts, last_error, dead, next_attempt_at, enqueued_at";

#[derive(FromRow)]
struct OutboxRow {
    id: i64,
    kind: String,
    user_id: String,
    payload: serde_json::Value,
    attempts: i32,
    last_error: Option<String>,
    dead: bool,
    next_attempt_at: DateTime<Utc>,
    enqueued_at: DateTime<Utc>,
}

impl From<OutboxRow> for OutboxEntry {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            user_id: row.user_id,
            payload: row.payload,
            attempts: row.attempts,
            last_error: row.last_error,
            dead: row.dead,
            next_attempt_at: row.next_attempt_at,
            enqueued_at: row.enqueued_at,
        }
    }
}

pub struct OutboxRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OutboxRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        kind: &str,
        user_id: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO follow_up_outbox (kind, user_id, payload, next_attempt_at, enqueued_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id
            "#,
        )
        .bind(kind)
        .bind(user_id)
        .bind(payload)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    /// Rows locked by another claimer are skipped, so concurrent workers
    /// never receive the same entry while its lease runs.
    pub async fn claim(
        &self,
        due_by: Option<DateTime<Utc>>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            r#"
            UPDATE follow_up_outbox
            SET next_attempt_at = $2
            WHERE id IN (
                SELECT id
                FROM follow_up_outbox
                WHERE NOT dead AND ($1::timestamptz IS NULL OR next_attempt_at <= $1)
                ORDER BY next_attempt_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        );
        let mut rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(due_by)
            .bind(lease_until)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await?;

        rows.sort_by_key(|row| row.id);
        Ok(rows.into_iter().map(OutboxEntry::from).collect())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM follow_up_outbox WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    pub async fn record_failure(
        &self,
        id: i64,
        attempts: i32,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE follow_up_outbox
            SET attempts = $2,
                last_error = $3,
                dead = $4::timestamptz IS NULL,
                next_attempt_at = COALESCE($4::timestamptz, next_attempt_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(retry_at)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    pub async fn count(&self, dead: bool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follow_up_outbox WHERE dead = $1")
            .bind(dead)
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    pub async fn dead(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM follow_up_outbox
            WHERE dead
            ORDER BY id DESC
            LIMIT $1
            "#
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(OutboxEntry::from).collect())
    }
}
