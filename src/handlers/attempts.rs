// src/handlers/attempts.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    attempt::{AttemptResults, AttemptService, results::ResultsQuery},
    error::AppError,
    models::attempt::{Attempt, AttemptResponse, LiveAttempt, RecordAnswerRequest},
    utils::jwt::Claims,
};

/// The caller's attempts, newest first.
#[utoipa::path(
    get,
    path = "/api/attempts",
    responses((status = 200, body = [Attempt])),
    security(("bearer" = [])),
    tag = "attempts"
)]
pub async fn list_attempts(
    State(service): State<AttemptService>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let actor = claims.actor()?;
    Ok(Json(service.history(&actor).await?))
}

/// The live-attempt view: questions, current selections and remaining time.
///
/// Completed (or timed-out) attempts redirect to their results.
#[utoipa::path(
    get,
    path = "/api/attempts/{id}",
    params(("id" = Uuid, Path, description = "Attempt id")),
    responses(
        (status = 200, body = LiveAttempt),
        (status = 303, description = "Attempt is completed; see results"),
        (status = 403, description = "Not the caller's attempt")
    ),
    security(("bearer" = [])),
    tag = "attempts"
)]
pub async fn get_attempt(
    State(service): State<AttemptService>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let actor = claims.actor()?;
    Ok(Json(service.live(&actor, id).await?))
}

/// Records (or overwrites) the selection for one question.
#[utoipa::path(
    put,
    path = "/api/attempts/{id}/responses/{question_id}",
    params(
        ("id" = Uuid, Path, description = "Attempt id"),
        ("question_id" = Uuid, Path, description = "Question id")
    ),
    request_body = RecordAnswerRequest,
    responses(
        (status = 200, body = AttemptResponse),
        (status = 303, description = "Attempt is completed; see results")
    ),
    security(("bearer" = [])),
    tag = "attempts"
)]
pub async fn record_answer(
    State(service): State<AttemptService>,
    Extension(claims): Extension<Claims>,
    Path((id, question_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<RecordAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let actor = claims.actor()?;
    let response = service
        .record_answer(&actor, id, question_id, payload.selected, payload.time_spent_seconds)
        .await?;
    Ok(Json(response))
}

/// Scores and closes the attempt. Safe to repeat.
#[utoipa::path(
    post,
    path = "/api/attempts/{id}/submit",
    params(("id" = Uuid, Path, description = "Attempt id")),
    responses((status = 200, body = Attempt)),
    security(("bearer" = [])),
    tag = "attempts"
)]
pub async fn submit_attempt(
    State(service): State<AttemptService>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let actor = claims.actor()?;
    Ok(Json(service.submit(&actor, id).await?))
}

/// Pass/fail and per-question review of a completed attempt.
///
/// Running attempts redirect back to the live view.
#[utoipa::path(
    get,
    path = "/api/attempts/{id}/results",
    params(("id" = Uuid, Path, description = "Attempt id"), ResultsQuery),
    responses(
        (status = 200, body = AttemptResults),
        (status = 303, description = "Attempt still running; see live view")
    ),
    security(("bearer" = [])),
    tag = "attempts"
)]
pub async fn get_results(
    State(service): State<AttemptService>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let actor = claims.actor()?;
    let results = service.results(&actor, id).await?;
    Ok(Json(results.filtered(query.filter)))
}
