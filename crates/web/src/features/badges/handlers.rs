use axum::{
    Json,
    extract::{Path, State},
};
use gamification::Gamification;
use storage::{dto::common::ListResponse, models::UserBadge};

use crate::error::WebError;

#[utoipa::path(
    get,
    path = "/api/badges/users/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "Badges held by the user, oldest first", body = ListResponse<UserBadge>)
    ),
    tag = "badges"
)]
pub async fn list_user_badges(
    State(core): State<Gamification>,
    Path(user_id): Path<String>,
) -> Result<Json<ListResponse<UserBadge>>, WebError> {
    let badges = core.badges.user_badges(&user_id).await?;

    Ok(Json(ListResponse::new(badges)))
}
