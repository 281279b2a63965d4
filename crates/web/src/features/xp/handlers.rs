use axum::{
    Json,
    extract::{Path, Query, State},
};
use gamification::{AwardRequest, AwardResult, Gamification};
use storage::{
    dto::{
        common::{LimitParams, ListResponse},
        xp::{AwardXpRequest, UserProgressResponse},
    },
    models::XpTransaction,
};
use validator::Validate;

use crate::error::WebError;

#[utoipa::path(
    post,
    path = "/api/xp/events",
    request_body = AwardXpRequest,
    responses(
        (status = 200, description = "Award processed; rejections and duplicates are reported in the body", body = AwardResult),
        (status = 400, description = "Validation error"),
        (status = 503, description = "Ledger unavailable, retry with the same context_id")
    ),
    tag = "xp"
)]
pub async fn award_xp(
    State(core): State<Gamification>,
    Json(req): Json<AwardXpRequest>,
) -> Result<Json<AwardResult>, WebError> {
    req.validate()?;

    let mut request = AwardRequest::new(req.user_id, req.event);
    if let Some(context_id) = req.context_id {
        request = request.with_context(context_id);
    }
    if let Some(metadata) = req.metadata {
        request = request.with_metadata(metadata);
    }

    let result = core.xp.award(request).await?;

    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/api/xp/users/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User progress found", body = UserProgressResponse),
        (status = 404, description = "User has no progress yet")
    ),
    tag = "xp"
)]
pub async fn get_progress(
    State(core): State<Gamification>,
    Path(user_id): Path<String>,
) -> Result<Json<UserProgressResponse>, WebError> {
    let progress = core.xp.progress(&user_id).await?.ok_or(WebError::NotFound)?;

    Ok(Json(UserProgressResponse::new(
        &progress,
        core.xp.daily_cap(),
        core.now(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/xp/users/{user_id}/transactions",
    params(
        ("user_id" = String, Path, description = "User id"),
        LimitParams
    ),
    responses(
        (status = 200, description = "Latest transactions, newest first", body = ListResponse<XpTransaction>),
        (status = 400, description = "Invalid query parameters")
    ),
    tag = "xp"
)]
pub async fn list_transactions(
    State(core): State<Gamification>,
    Path(user_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ListResponse<XpTransaction>>, WebError> {
    params.validate().map_err(WebError::BadRequest)?;

    let transactions = core.xp.transactions(&user_id, params.limit).await?;

    Ok(Json(ListResponse::new(transactions)))
}
