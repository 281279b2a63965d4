use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::parse_text;
use crate::error::{Result, StorageError};
use crate::models::{Tier, UserProgress, XpEvent, XpTransaction};
use crate::store::{AdjustmentCommand, AwardCommand, AwardCommit};

const PROGRESS_COLUMNS: &str = "user_id, total_xp, daily_xp, last_award_date, streak_days, tier, \
     last_activity_at, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "transaction_id, user_id, event, xp_amount, context_id, metadata, capped, created_at";

#[derive(FromRow)]
struct ProgressRow {
    user_id: String,
    total_xp: i64,
    daily_xp: i64,
    last_award_date: Option<NaiveDate>,
    streak_days: i32,
    tier: String,
    last_activity_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProgressRow> for UserProgress {
    type Error = StorageError;

    fn try_from(row: ProgressRow) -> Result<Self> {
        Ok(Self {
            user_id: row.user_id,
            total_xp: row.total_xp,
            daily_xp: row.daily_xp,
            last_award_date: row.last_award_date,
            streak_days: row.streak_days,
            tier: parse_text(&row.tier, "tier")?,
            last_activity_at: row.last_activity_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    user_id: String,
    event: String,
    xp_amount: i64,
    context_id: Option<String>,
    metadata: serde_json::Value,
    capped: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for XpTransaction {
    type Error = StorageError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Self {
            transaction_id: row.transaction_id,
            user_id: row.user_id,
            event: parse_text(&row.event, "event")?,
            xp_amount: row.xp_amount,
            context_id: row.context_id,
            metadata: row.metadata,
            capped: row.capped,
            created_at: row.created_at,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<XpTransaction>> {
    rows.into_iter().map(XpTransaction::try_from).collect()
}

/// Repository for the per-user XP ledger
pub struct XpRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> XpRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Apply one award under a row lock on the user's progress.
    pub async fn commit_award(&self, command: &AwardCommand) -> Result<AwardCommit> {
        let mut tx = self.pool.begin().await?;

        let mut progress = lock_progress(&mut tx, &command.user_id, command.now).await?;

        if let Some(context_id) = command.context_id.as_deref() {
            let existing =
                fetch_by_context(&mut tx, &command.user_id, command.event, context_id).await?;
            if let Some(existing) = existing {
                tx.rollback().await?;
                return Ok(AwardCommit::Duplicate { existing });
            }
        }

        let outcome = progress.apply_award(command.base_xp, command.daily_cap, command.now);
        let transaction = XpTransaction::new(
            &command.user_id,
            command.event,
            outcome.credited,
            command.context_id.clone(),
            command.metadata.clone(),
            outcome.capped,
            outcome.credited_at,
        );

        save_progress(&mut tx, &progress).await?;

        if let Err(e) = insert_transaction(&mut tx, &transaction).await {
            // The partial unique index caught a replay that raced past the
            // in-transaction check.
            if e.is_unique_violation()
                && let Some(context_id) = command.context_id.as_deref()
            {
                drop(tx);
                let existing = self
                    .find_transaction(&command.user_id, command.event, context_id)
                    .await?
                    .ok_or(StorageError::NotFound)?;
                return Ok(AwardCommit::Duplicate { existing });
            }
            return Err(e);
        }

        tx.commit().await?;

        Ok(AwardCommit::Committed {
            transaction,
            progress,
        })
    }

    pub async fn commit_adjustment(
        &self,
        command: &AdjustmentCommand,
    ) -> Result<(UserProgress, XpTransaction)> {
        let mut tx = self.pool.begin().await?;

        let mut progress = lock_progress(&mut tx, &command.user_id, command.now).await?;
        let applied = progress.apply_adjustment(command.delta, command.now);

        let transaction = XpTransaction::new(
            &command.user_id,
            XpEvent::AdminAdjustment,
            applied,
            None,
            serde_json::json!({
                "reason": command.reason,
                "admin_id": command.admin_id,
                "requested_delta": command.delta,
            }),
            false,
            command.now,
        );

        save_progress(&mut tx, &progress).await?;
        insert_transaction(&mut tx, &transaction).await?;
        tx.commit().await?;

        Ok((progress, transaction))
    }

    pub async fn set_tier(&self, user_id: &str, tier: Tier, now: DateTime<Utc>) -> Result<UserProgress> {
        let sql = format!(
            r#"
            INSERT INTO user_progress (user_id, tier, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (user_id) DO UPDATE SET tier = EXCLUDED.tier, updated_at = EXCLUDED.updated_at
            RETURNING {PROGRESS_COLUMNS}
            "#
        );
        let row: ProgressRow = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(tier.as_ref())
            .bind(now)
            .fetch_one(self.pool)
            .await?;

        row.try_into()
    }

    pub async fn find_progress(&self, user_id: &str) -> Result<Option<UserProgress>> {
        let sql = format!("SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE user_id = $1");
        let row: Option<ProgressRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;

        row.map(UserProgress::try_from).transpose()
    }

    pub async fn list_active(&self) -> Result<Vec<UserProgress>> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE total_xp > 0 ORDER BY user_id"
        );
        let rows: Vec<ProgressRow> = sqlx::query_as(&sql).fetch_all(self.pool).await?;

        rows.into_iter().map(UserProgress::try_from).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM user_progress")
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    pub async fn find_transaction(
        &self,
        user_id: &str,
        event: XpEvent,
        context_id: &str,
    ) -> Result<Option<XpTransaction>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_context(&mut conn, user_id, event, context_id).await
    }

    pub async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<XpTransaction>> {
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM xp_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await?;

        into_transactions(rows)
    }

    pub async fn between(
        &self,
        user_id: &str,
        event: Option<XpEvent>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<XpTransaction>> {
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM xp_transactions
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR event = $2)
              AND created_at BETWEEN $3 AND $4
            ORDER BY created_at ASC
            "#
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(event.map(|e| e.to_string()))
            .bind(from)
            .bind(to)
            .fetch_all(self.pool)
            .await?;

        into_transactions(rows)
    }

    pub async fn count_for_event(&self, user_id: &str, event: XpEvent) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM xp_transactions WHERE user_id = $1 AND event = $2",
        )
        .bind(user_id)
        .bind(event.as_ref())
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }
}

/// Create the progress row if missing and lock it for the rest of the
/// transaction.
async fn lock_progress(
    conn: &mut PgConnection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<UserProgress> {
    sqlx::query(
        r#"
        INSERT INTO user_progress (user_id, created_at, updated_at)
        VALUES ($1, $2, $2)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let sql = format!("SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE user_id = $1 FOR UPDATE");
    let row: ProgressRow = sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

    row.try_into()
}

async fn save_progress(conn: &mut PgConnection, progress: &UserProgress) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE user_progress
        SET total_xp = $2,
            daily_xp = $3,
            last_award_date = $4,
            streak_days = $5,
            tier = $6,
            last_activity_at = $7,
            updated_at = $8
        WHERE user_id = $1
        "#,
    )
    .bind(&progress.user_id)
    .bind(progress.total_xp)
    .bind(progress.daily_xp)
    .bind(progress.last_award_date)
    .bind(progress.streak_days)
    .bind(progress.tier.as_ref())
    .bind(progress.last_activity_at)
    .bind(progress.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_transaction(conn: &mut PgConnection, transaction: &XpTransaction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO xp_transactions (
            transaction_id, user_id, event, xp_amount, context_id, metadata, capped, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(transaction.transaction_id)
    .bind(&transaction.user_id)
    .bind(transaction.event.as_ref())
    .bind(transaction.xp_amount)
    .bind(&transaction.context_id)
    .bind(&transaction.metadata)
    .bind(transaction.capped)
    .bind(transaction.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn fetch_by_context(
    conn: &mut PgConnection,
    user_id: &str,
    event: XpEvent,
    context_id: &str,
) -> Result<Option<XpTransaction>> {
    let sql = format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM xp_transactions
        WHERE user_id = $1 AND event = $2 AND context_id = $3
        "#
    );
    let row: Option<TransactionRow> = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(event.as_ref())
        .bind(context_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(XpTransaction::try_from).transpose()
}
