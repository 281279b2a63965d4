use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct LimitParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

impl LimitParams {
    pub fn validate(&self) -> Result<(), String> {
        validate_limit(self.limit)
    }
}

pub(crate) fn validate_limit(limit: usize) -> Result<(), String> {
    if limit < 1 || limit > MAX_LIMIT {
        return Err(format!("limit must be between 1 and {MAX_LIMIT}"));
    }
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            count: data.len(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_bounds() {
        assert!(LimitParams { limit: 0 }.validate().is_err());
        assert!(LimitParams { limit: 1 }.validate().is_ok());
        assert!(LimitParams { limit: MAX_LIMIT }.validate().is_ok());
        assert!(LimitParams { limit: MAX_LIMIT + 1 }.validate().is_err());
    }

    #[test]
    fn test_list_response_counts_items() {
        let response = ListResponse::new(vec![1, 2, 3]);
        assert_eq!(response.count, 3);
    }
}
