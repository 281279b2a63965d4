use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use gamification::Gamification;

use super::handlers::{
    activate_challenge, adjust_xp, archive_challenge, badge_stats, complete_challenge,
    create_challenge, list_alerts, outbox_stats, recompute_rankings, refresh_badges,
    resolve_alert, set_tier, sweep_challenges,
};
use crate::middleware::auth::{ApiKeys, require_auth};

pub fn routes(api_keys: ApiKeys) -> Router<Gamification> {
    Router::new()
        .route("/xp/adjust", post(adjust_xp))
        .route("/users/:user_id/tier", put(set_tier))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .route("/badges/stats", get(badge_stats))
        .route("/badges/refresh", post(refresh_badges))
        .route("/challenges", post(create_challenge))
        .route("/challenges/sweep", post(sweep_challenges))
        .route("/challenges/:id/activate", post(activate_challenge))
        .route("/challenges/:id/complete", post(complete_challenge))
        .route("/challenges/:id/archive", post(archive_challenge))
        .route("/rankings/recompute", post(recompute_rankings))
        .route("/outbox", get(outbox_stats))
        .route_layer(middleware::from_fn_with_state(api_keys, require_auth))
}
