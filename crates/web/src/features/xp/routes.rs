use axum::{
    Router,
    routing::{get, post},
};
use gamification::Gamification;

use super::handlers::{award_xp, get_progress, list_transactions};

pub fn routes() -> Router<Gamification> {
    Router::new()
        .route("/events", post(award_xp))
        .route("/users/:user_id", get(get_progress))
        .route("/users/:user_id/transactions", get(list_transactions))
}
