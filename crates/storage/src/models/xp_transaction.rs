use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::XpEvent;

/// Append-only audit record of one award (or admin adjustment).
///
/// `xp_amount` is what actually landed on the ledger, so a capped award
/// records the reduced value and a fully capped one records zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct XpTransaction {
    pub transaction_id: Uuid,
    pub user_id: String,
    pub event: XpEvent,
    pub xp_amount: i64,
    pub context_id: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub capped: bool,
    pub created_at: DateTime<Utc>,
}

impl XpTransaction {
    pub fn new(
        user_id: impl Into<String>,
        event: XpEvent,
        xp_amount: i64,
        context_id: Option<String>,
        metadata: serde_json::Value,
        capped: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            user_id: user_id.into(),
            event,
            xp_amount,
            context_id,
            metadata,
            capped,
            created_at,
        }
    }
}
