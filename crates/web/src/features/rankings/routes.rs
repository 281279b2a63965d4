use axum::{Router, routing::get};
use gamification::Gamification;

use super::handlers::{get_leaderboard, get_user_ranking};

pub fn routes() -> Router<Gamification> {
    Router::new()
        .route("/leaderboard", get(get_leaderboard))
        .route("/users/:user_id", get(get_user_ranking))
}
