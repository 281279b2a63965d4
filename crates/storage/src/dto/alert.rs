use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::common::validate_limit;

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct AlertFilter {
    #[serde(default = "default_unresolved")]
    pub unresolved: bool,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_unresolved() -> bool {
    true
}

fn default_limit() -> usize {
    50
}

impl AlertFilter {
    pub fn validate(&self) -> Result<(), String> {
        validate_limit(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResolveAlertRequest {
    #[validate(length(min = 1, max = 128))]
    pub admin_id: String,
}
