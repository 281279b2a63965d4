use axum::{
    Json,
    extract::{Path, Query, State},
};
use gamification::Gamification;
use storage::dto::ranking::{GlobalLeaderboardResponse, LeaderboardFilter, UserRankingResponse};

use crate::error::WebError;

#[utoipa::path(
    get,
    path = "/api/rankings/leaderboard",
    params(LeaderboardFilter),
    responses(
        (status = 200, description = "Leaderboard retrieved successfully", body = GlobalLeaderboardResponse),
        (status = 400, description = "Invalid query parameters")
    ),
    tag = "rankings"
)]
pub async fn get_leaderboard(
    State(core): State<Gamification>,
    Query(filter): Query<LeaderboardFilter>,
) -> Result<Json<GlobalLeaderboardResponse>, WebError> {
    filter.validate().map_err(WebError::BadRequest)?;

    let leaderboard = core.ranking.leaderboard(filter.category, filter.limit).await?;

    Ok(Json(leaderboard))
}

#[utoipa::path(
    get,
    path = "/api/rankings/users/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "Overall rank of the user", body = UserRankingResponse)
    ),
    tag = "rankings"
)]
pub async fn get_user_ranking(
    State(core): State<Gamification>,
    Path(user_id): Path<String>,
) -> Result<Json<UserRankingResponse>, WebError> {
    let ranking = core.ranking.user_ranking(&user_id).await?;

    Ok(Json(ranking))
}
