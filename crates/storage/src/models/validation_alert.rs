use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use super::XpEvent;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
    CooldownViolation,
    RateLimitExceeded,
    SuspiciousPattern,
}

#[derive(
    Debug,
    Clone,
    Copy,
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
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Operator-facing record of a rejected or suspicious award attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ValidationAlert {
    pub alert_id: Uuid,
    pub user_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub event: XpEvent,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ValidationAlert {
    pub fn new(
        user_id: impl Into<String>,
        kind: AlertKind,
        severity: Severity,
        event: XpEvent,
        details: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind,
            severity,
            event,
            details,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            created_at,
        }
    }

    pub fn resolve(&mut self, admin_id: impl Into<String>, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_by = Some(admin_id.into());
        self.resolved_at = Some(now);
    }
}
