// src/store/mod.rs

//! Persistence seam.
//!
//! Every component receives an explicit `Arc<dyn Store>` instead of reaching
//! for a process-wide database client. `PgStore` talks to Postgres,
//! `MemoryStore` keeps everything in process and backs the tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    attempt::scorer::AnswerKey,
    error::AppError,
    models::{
        attempt::{Attempt, AttemptResponse, ResponseWrite},
        practice_test::{NewQuestion, NewTest, Question, TestDefinition},
        user::User,
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// What is needed to close an attempt. The store scores the responses it
/// reads under the same lock that flips the status, so no answer can land
/// between scoring and completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub completed_at: DateTime<Utc>,
    pub time_taken_seconds: i64,
    pub keys: Vec<AnswerKey>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Users

    /// Fails with `Conflict` when the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str, role: &str) -> Result<User, AppError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    // Test definitions and the question bank

    async fn create_test(&self, test: NewTest) -> Result<TestDefinition, AppError>;

    async fn list_tests(&self) -> Result<Vec<TestDefinition>, AppError>;

    async fn get_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>, AppError>;

    /// Appends the question after the test's current last position.
    /// Fails with `Conflict` once any attempt exists for the test: a test
    /// that has been taken is frozen.
    async fn add_question(&self, test_id: Uuid, question: NewQuestion) -> Result<Question, AppError>;

    async fn get_question(&self, question_id: Uuid) -> Result<Option<Question>, AppError>;

    /// Questions of a test ordered by position.
    async fn list_questions(&self, test_id: Uuid) -> Result<Vec<Question>, AppError>;

    // Attempts

    async fn create_attempt(&self, user_id: Uuid, test_id: Uuid, started_at: DateTime<Utc>) -> Result<Attempt, AppError>;

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>, AppError>;

    /// The caller's most recent `in_progress` attempt for a test, if any.
    async fn find_open_attempt(&self, user_id: Uuid, test_id: Uuid) -> Result<Option<Attempt>, AppError>;

    /// Newest first.
    async fn list_attempts_for_user(&self, user_id: Uuid) -> Result<Vec<Attempt>, AppError>;

    /// Ids of `in_progress` attempts whose `started_at + duration` is not after `cutoff`.
    async fn list_expired_attempts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;

    /// Scores the stored responses against `completion.keys`, transitions
    /// `in_progress -> completed` and stamps each response's correctness,
    /// all while holding the attempt's lock. If the attempt is already
    /// completed the stored row is returned untouched.
    async fn complete_attempt(&self, attempt_id: Uuid, completion: &Completion) -> Result<Attempt, AppError>;

    // Responses

    /// Insert or overwrite the response for (attempt, question).
    /// Fails with `AttemptCompleted` once the attempt is closed.
    async fn upsert_response(&self, write: ResponseWrite) -> Result<AttemptResponse, AppError>;

    async fn list_responses(&self, attempt_id: Uuid) -> Result<Vec<AttemptResponse>, AppError>;
}
