use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gamification::{Gamification, OutboxStats};
use storage::{
    dto::{
        alert::{AlertFilter, ResolveAlertRequest},
        badge::{BadgeStatsResponse, CatalogRefreshResponse},
        challenge::{CreateChallengeRequest, SweepSummary},
        common::ListResponse,
        ranking::RecomputeSummary,
        xp::{AdjustXpRequest, AdjustXpResponse, SetTierRequest, UserProgressResponse},
    },
    models::{Challenge, ValidationAlert},
};
use uuid::Uuid;
use validator::Validate;

use crate::error::WebError;

#[utoipa::path(
    post,
    path = "/api/admin/xp/adjust",
    request_body = AdjustXpRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Adjustment applied", body = AdjustXpResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn adjust_xp(
    State(core): State<Gamification>,
    Json(req): Json<AdjustXpRequest>,
) -> Result<Json<AdjustXpResponse>, WebError> {
    req.validate()?;

    let (progress, transaction) = core
        .xp
        .adjust(&req.user_id, req.delta, &req.reason, &req.admin_id)
        .await?;

    Ok(Json(AdjustXpResponse {
        progress: UserProgressResponse::new(&progress, core.xp.daily_cap(), core.now()),
        transaction,
    }))
}

#[utoipa::path(
    put,
    path = "/api/admin/users/{user_id}/tier",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    request_body = SetTierRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Tier updated", body = UserProgressResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn set_tier(
    State(core): State<Gamification>,
    Path(user_id): Path<String>,
    Json(req): Json<SetTierRequest>,
) -> Result<Json<UserProgressResponse>, WebError> {
    let progress = core.xp.set_tier(&user_id, req.tier).await?;

    Ok(Json(UserProgressResponse::new(
        &progress,
        core.xp.daily_cap(),
        core.now(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/admin/alerts",
    params(AlertFilter),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Validation alerts, newest first", body = ListResponse<ValidationAlert>),
        (status = 400, description = "Invalid query parameters"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn list_alerts(
    State(core): State<Gamification>,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<ListResponse<ValidationAlert>>, WebError> {
    filter.validate().map_err(WebError::BadRequest)?;

    let alerts = core.validator.list_alerts(filter.unresolved, filter.limit).await?;

    Ok(Json(ListResponse::new(alerts)))
}

#[utoipa::path(
    post,
    path = "/api/admin/alerts/{id}/resolve",
    params(
        ("id" = Uuid, Path, description = "Alert id")
    ),
    request_body = ResolveAlertRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Alert resolved", body = ValidationAlert),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Alert not found")
    ),
    tag = "admin"
)]
pub async fn resolve_alert(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveAlertRequest>,
) -> Result<Json<ValidationAlert>, WebError> {
    req.validate()?;

    let alert = core.validator.resolve_alert(id, &req.admin_id).await?;

    Ok(Json(alert))
}

#[utoipa::path(
    get,
    path = "/api/admin/badges/stats",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Award counts per badge", body = BadgeStatsResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn badge_stats(State(core): State<Gamification>) -> Result<Json<BadgeStatsResponse>, WebError> {
    let stats = core.badges.stats().await?;

    Ok(Json(stats))
}

#[utoipa::path(
    post,
    path = "/api/admin/badges/refresh",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Starter badges seeded and catalogue reloaded", body = CatalogRefreshResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn refresh_badges(
    State(core): State<Gamification>,
) -> Result<Json<CatalogRefreshResponse>, WebError> {
    let refreshed = core.badges.refresh_catalog().await?;

    Ok(Json(refreshed))
}

#[utoipa::path(
    post,
    path = "/api/admin/challenges",
    request_body = CreateChallengeRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 201, description = "Challenge created", body = Challenge),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn create_challenge(
    State(core): State<Gamification>,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<Response, WebError> {
    req.validate()?;

    req.validate_dates()
        .and_then(|_| req.validate_rewards())
        .map_err(|e| WebError::BadRequest(e.to_string()))?;

    let challenge = core.challenges.create(req).await?;

    Ok((StatusCode::CREATED, Json(challenge)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/admin/challenges/{id}/activate",
    params(
        ("id" = Uuid, Path, description = "Challenge id")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Challenge activated", body = Challenge),
        (status = 400, description = "Challenge is not upcoming"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Challenge not found")
    ),
    tag = "admin"
)]
pub async fn activate_challenge(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
) -> Result<Json<Challenge>, WebError> {
    Ok(Json(core.challenges.activate(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/challenges/{id}/complete",
    params(
        ("id" = Uuid, Path, description = "Challenge id")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Challenge completed and rewards queued", body = Challenge),
        (status = 400, description = "Challenge already completed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Challenge not found")
    ),
    tag = "admin"
)]
pub async fn complete_challenge(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
) -> Result<Json<Challenge>, WebError> {
    Ok(Json(core.challenges.complete(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/challenges/{id}/archive",
    params(
        ("id" = Uuid, Path, description = "Challenge id")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Challenge archived", body = Challenge),
        (status = 400, description = "Challenge is not completed"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Challenge not found")
    ),
    tag = "admin"
)]
pub async fn archive_challenge(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
) -> Result<Json<Challenge>, WebError> {
    Ok(Json(core.challenges.archive(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/challenges/sweep",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Due challenges activated and completed", body = SweepSummary),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn sweep_challenges(State(core): State<Gamification>) -> Json<SweepSummary> {
    Json(core.challenges.sweep().await)
}

#[utoipa::path(
    post,
    path = "/api/admin/rankings/recompute",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Ranking scores recomputed", body = RecomputeSummary),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn recompute_rankings(
    State(core): State<Gamification>,
) -> Result<Json<RecomputeSummary>, WebError> {
    let summary = core.ranking.recompute_all().await?;

    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/api/admin/outbox",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Follow-up queue counters", body = OutboxStats),
        (status = 401, description = "Unauthorized")
    ),
    tag = "admin"
)]
pub async fn outbox_stats(State(core): State<Gamification>) -> Result<Json<OutboxStats>, WebError> {
    let stats = core.outbox.stats().await?;

    Ok(Json(stats))
}
