// src/handlers/admin.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::DEFAULT_PASSING_SCORE,
    error::AppError,
    models::practice_test::{CreateQuestionRequest, CreateTestRequest, NewTest},
    store::Store,
    utils::html::{clean_html, sanitize_question},
};

/// Creates a practice test definition.
/// Admin only.
pub async fn create_test(
    State(store): State<Arc<dyn Store>>,
    Json(payload): Json<CreateTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let test = store
        .create_test(NewTest {
            title: clean_html(&payload.title),
            description: payload.description.as_deref().map(clean_html),
            duration_minutes: payload.duration_minutes,
            passing_score: payload.passing_score.unwrap_or(DEFAULT_PASSING_SCORE),
        })
        .await?;

    tracing::info!(test_id = %test.id, "Practice test created");
    Ok((StatusCode::CREATED, Json(test)))
}

/// Appends a question to a test.
/// Admin only. Answers `409` once anyone has started the test.
pub async fn add_question(
    State(store): State<Arc<dyn Store>>,
    Path(test_id): Path<Uuid>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    store
        .get_test(test_id)
        .await?
        .ok_or(AppError::NotFound("Test not found".to_string()))?;

    let question = store.add_question(test_id, sanitize_question(payload)).await?;

    Ok((StatusCode::CREATED, Json(question)))
}
