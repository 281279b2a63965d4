use axum::Router;
use gamification::Gamification;

use crate::features::{admin, badges, challenges, rankings, xp};
use crate::middleware::auth::ApiKeys;

pub fn router(core: Gamification, api_keys: ApiKeys) -> Router {
    Router::new()
        .nest("/api/xp", xp::routes::routes())
        .nest("/api/badges", badges::routes::routes())
        .nest("/api/rankings", rankings::routes::routes())
        .nest("/api/challenges", challenges::routes::routes())
        .nest("/api/admin", admin::routes::routes(api_keys))
        .with_state(core)
}
