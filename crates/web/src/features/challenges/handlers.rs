use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gamification::Gamification;
use storage::{
    dto::{
        challenge::{ChallengeFilter, ChallengeProgressRequest, JoinChallengeRequest},
        common::ListResponse,
    },
    models::{Challenge, ChallengeLeaderboard, ChallengeParticipation},
};
use uuid::Uuid;
use validator::Validate;

use crate::error::WebError;

#[utoipa::path(
    get,
    path = "/api/challenges",
    params(ChallengeFilter),
    responses(
        (status = 200, description = "Challenges, latest start first", body = ListResponse<Challenge>)
    ),
    tag = "challenges"
)]
pub async fn list_challenges(
    State(core): State<Gamification>,
    Query(filter): Query<ChallengeFilter>,
) -> Result<Json<ListResponse<Challenge>>, WebError> {
    let challenges = core.challenges.list(filter.status).await?;

    Ok(Json(ListResponse::new(challenges)))
}

#[utoipa::path(
    get,
    path = "/api/challenges/{id}",
    params(
        ("id" = Uuid, Path, description = "Challenge id")
    ),
    responses(
        (status = 200, description = "Challenge found", body = Challenge),
        (status = 404, description = "Challenge not found")
    ),
    tag = "challenges"
)]
pub async fn get_challenge(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
) -> Result<Json<Challenge>, WebError> {
    let challenge = core.challenges.get(id).await?;

    Ok(Json(challenge))
}

#[utoipa::path(
    get,
    path = "/api/challenges/{id}/leaderboard",
    params(
        ("id" = Uuid, Path, description = "Challenge id")
    ),
    responses(
        (status = 200, description = "Latest leaderboard snapshot", body = ChallengeLeaderboard),
        (status = 404, description = "Challenge not found")
    ),
    tag = "challenges"
)]
pub async fn get_challenge_leaderboard(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChallengeLeaderboard>, WebError> {
    let leaderboard = core.challenges.leaderboard(id).await?;

    Ok(Json(leaderboard))
}

#[utoipa::path(
    post,
    path = "/api/challenges/{id}/join",
    params(
        ("id" = Uuid, Path, description = "Challenge id")
    ),
    request_body = JoinChallengeRequest,
    responses(
        (status = 201, description = "Joined the challenge", body = ChallengeParticipation),
        (status = 400, description = "Challenge is not open for participants"),
        (status = 404, description = "Challenge not found"),
        (status = 409, description = "User already joined")
    ),
    tag = "challenges"
)]
pub async fn join_challenge(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
    Json(req): Json<JoinChallengeRequest>,
) -> Result<Response, WebError> {
    req.validate()?;

    let participation = core.challenges.join(id, &req.user_id).await?;

    Ok((StatusCode::CREATED, Json(participation)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/challenges/{id}/progress",
    params(
        ("id" = Uuid, Path, description = "Challenge id")
    ),
    request_body = ChallengeProgressRequest,
    responses(
        (status = 200, description = "Progress recorded and leaderboard rebuilt", body = ChallengeParticipation),
        (status = 400, description = "Validation error or challenge not active"),
        (status = 404, description = "Challenge not found or user not participating")
    ),
    tag = "challenges"
)]
pub async fn record_progress(
    State(core): State<Gamification>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChallengeProgressRequest>,
) -> Result<Json<ChallengeParticipation>, WebError> {
    req.validate()?;

    let participation = core
        .challenges
        .update_progress(id, &req.user_id, req.value)
        .await?;

    Ok(Json(participation))
}
