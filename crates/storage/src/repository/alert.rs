use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::parse_text;
use crate::error::{Result, StorageError};
use crate::models::ValidationAlert;

const ALERT_COLUMNS: &str =
    "alert_id, user_id, kind, severity, event, details, resolved, resolved_by, resolved_at, created_at";

#[derive(FromRow)]
struct AlertRow {
    alert_id: Uuid,
    user_id: String,
    kind: String,
    severity: String,
    event: String,
    details: serde_json::Value,
    resolved: bool,
    resolved_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for ValidationAlert {
    type Error = StorageError;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(Self {
            alert_id: row.alert_id,
            user_id: row.user_id,
            kind: parse_text(&row.kind, "kind")?,
            severity: parse_text(&row.severity, "severity")?,
            event: parse_text(&row.event, "event")?,
            details: row.details,
            resolved: row.resolved,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}

pub struct AlertRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> AlertRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, alert: &ValidationAlert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO validation_alerts (
                alert_id, user_id, kind, severity, event, details, resolved, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(alert.alert_id)
        .bind(&alert.user_id)
        .bind(alert.kind.as_ref())
        .bind(alert.severity.as_ref())
        .bind(alert.event.as_ref())
        .bind(&alert.details)
        .bind(alert.resolved)
        .bind(alert.created_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn resolve(
        &self,
        alert_id: Uuid,
        admin_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidationAlert> {
        let sql = format!(
            r#"
            UPDATE validation_alerts
            SET resolved = TRUE, resolved_by = $2, resolved_at = $3
            WHERE alert_id = $1
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let row: AlertRow = sqlx::query_as(&sql)
            .bind(alert_id)
            .bind(admin_id)
            .bind(now)
            .fetch_optional(self.pool)
            .await?
            .ok_or(StorageError::NotFound)?;

        row.try_into()
    }

    pub async fn list(&self, unresolved_only: bool, limit: usize) -> Result<Vec<ValidationAlert>> {
        let sql = format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM validation_alerts
            WHERE (NOT $1 OR resolved = FALSE)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        let rows: Vec<AlertRow> = sqlx::query_as(&sql)
            .bind(unresolved_only)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await?;

        rows.into_iter().map(ValidationAlert::try_from).collect()
    }
}
