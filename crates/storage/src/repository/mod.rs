pub mod alert;
pub mod badge;
pub mod challenge;
pub mod creator_stats;
pub mod outbox;
pub mod ranking;
pub mod xp;

use std::str::FromStr;

use crate::error::{Result, StorageError};

/// Parse a TEXT column holding one of the snake_case enum names.
pub(crate) fn parse_text<T: FromStr>(value: &str, column: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| StorageError::Decode(format!("unexpected {column} value '{value}'")))
}

/// Map a unique-key violation to a domain-level constraint error.
pub(crate) fn unique_violation(error: sqlx::Error, message: &str) -> StorageError {
    let error = StorageError::from(error);
    if error.is_unique_violation() {
        StorageError::ConstraintViolation(message.to_string())
    } else {
        error
    }
}
