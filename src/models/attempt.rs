// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::practice_test::Choice;

/// `in_progress --(submit | timeout)--> completed`. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
}

/// Represents the 'practice_test_attempts' table: one timed test instance.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Attempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub test_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Set together with `score`, exactly once.
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    /// Percentage, `None` until completed.
    pub score: Option<f64>,
    pub correct_count: i32,
    pub wrong_count: i32,
    pub unanswered_count: i32,
    pub time_taken_seconds: Option<i64>,
}

impl Attempt {
    pub fn is_completed(&self) -> bool {
        self.status == AttemptStatus::Completed
    }
}

/// Represents the 'practice_test_responses' table.
/// At most one row per (attempt, question).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct AttemptResponse {
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    /// `None` records an explicit non-answer.
    pub selected: Option<Choice>,
    pub time_spent_seconds: i32,
    /// Only set when the attempt is scored.
    pub is_correct: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

/// Input for `Store::upsert_response`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseWrite {
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub selected: Option<Choice>,
    pub time_spent_seconds: i32,
}

/// A selection the client holds that the store has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAnswer {
    pub question_id: Uuid,
    pub selected: Option<Choice>,
    pub time_spent_seconds: i32,
}

/// DTO for recording an answer. A missing `selected` clears the selection.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RecordAnswerRequest {
    #[serde(default)]
    pub selected: Option<Choice>,
    #[serde(default)]
    #[validate(range(min = 0, max = 86_400))]
    pub time_spent_seconds: i32,
}

/// A question as shown during the attempt, with the caller's current selection.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LiveQuestion {
    pub id: Uuid,
    pub position: i32,
    pub prompt: String,
    pub options: Vec<String>,
    pub selected: Option<Choice>,
}

/// The "take test" view of an in-progress attempt.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LiveAttempt {
    pub attempt: Attempt,
    pub test_title: String,
    pub duration_minutes: i32,
    /// Recomputed from `started_at` on every read.
    pub remaining_seconds: i64,
    pub answered_count: usize,
    pub questions: Vec<LiveQuestion>,
}
