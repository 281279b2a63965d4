use axum::{
    Router,
    routing::{get, post},
};
use gamification::Gamification;

use super::handlers::{
    get_challenge, get_challenge_leaderboard, join_challenge, list_challenges, record_progress,
};

pub fn routes() -> Router<Gamification> {
    Router::new()
        .route("/", get(list_challenges))
        .route("/:id", get(get_challenge))
        .route("/:id/leaderboard", get(get_challenge_leaderboard))
        .route("/:id/join", post(join_challenge))
        .route("/:id/progress", post(record_progress))
}
