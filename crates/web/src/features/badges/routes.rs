use axum::{Router, routing::get};
use gamification::Gamification;

use super::handlers::list_user_badges;

pub fn routes() -> Router<Gamification> {
    Router::new().route("/users/:user_id", get(list_user_badges))
}
