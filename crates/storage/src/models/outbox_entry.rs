use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A queued follow-up as stored in the outbox table.
///
/// `payload` holds the serialized follow-up; `kind` and `user_id` are copied
/// out of it so operators can filter dead letters without decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OutboxEntry {
    pub id: i64,
    pub kind: String,
    pub user_id: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub dead: bool,
    pub next_attempt_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Whether a worker may claim the entry at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.dead && self.next_attempt_at <= now
    }
}
