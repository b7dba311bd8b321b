// src/store/postgres.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Completion, Store};
use crate::{
    attempt::scorer::{self, Outcome},
    error::AppError,
    models::{
        attempt::{Attempt, AttemptResponse, AttemptStatus, ResponseWrite},
        practice_test::{Choice, NewQuestion, NewTest, Question, TestDefinition},
        user::User,
    },
};

const ATTEMPT_COLUMNS: &str = "id, user_id, test_id, started_at, completed_at, status, score, \
     correct_count, wrong_count, unanswered_count, time_taken_seconds";

const QUESTION_COLUMNS: &str = "id, test_id, position, prompt, option_a, option_b, option_c, option_d, \
     correct_option, explanation";

/// `Store` backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, username: &str, password_hash: &str, role: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, password, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password, role, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Username '{}' already exists", username))
            } else {
                tracing::error!("Failed to create user: {:?}", e);
                AppError::from(e)
            }
        })
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password, role, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_test(&self, test: NewTest) -> Result<TestDefinition, AppError> {
        let created = sqlx::query_as::<_, TestDefinition>(
            r#"
            INSERT INTO practice_tests (id, title, description, duration_minutes, passing_score)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, title, description, duration_minutes, passing_score, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&test.title)
        .bind(&test.description)
        .bind(test.duration_minutes)
        .bind(test.passing_score)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_tests(&self) -> Result<Vec<TestDefinition>, AppError> {
        let tests = sqlx::query_as::<_, TestDefinition>(
            r#"
            SELECT id, title, description, duration_minutes, passing_score, created_at
            FROM practice_tests
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tests)
    }

    async fn get_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>, AppError> {
        let test = sqlx::query_as::<_, TestDefinition>(
            r#"
            SELECT id, title, description, duration_minutes, passing_score, created_at
            FROM practice_tests
            WHERE id = $1
            "#,
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(test)
    }

    async fn add_question(&self, test_id: Uuid, question: NewQuestion) -> Result<Question, AppError> {
        let mut tx = self.pool.begin().await?;

        // Exclusive test lock; `create_attempt` takes a shared one.
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM practice_tests WHERE id = $1 FOR UPDATE")
            .bind(test_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Err(AppError::NotFound("Test not found".to_string()));
        }

        let attempted: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM practice_test_attempts WHERE test_id = $1)")
                .bind(test_id)
                .fetch_one(&mut *tx)
                .await?;
        if attempted {
            tx.rollback().await?;
            return Err(AppError::Conflict(
                "Test has already been taken; its questions are frozen".to_string(),
            ));
        }

        let [option_a, option_b, option_c, option_d] = question.options;
        let sql = format!(
            r#"
            INSERT INTO practice_test_questions
                (id, test_id, position, prompt, option_a, option_b, option_c, option_d, correct_option, explanation)
            VALUES (
                $1, $2,
                COALESCE((SELECT MAX(position) FROM practice_test_questions WHERE test_id = $2), 0) + 1,
                $3, $4, $5, $6, $7, $8, $9
            )
            RETURNING {QUESTION_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, Question>(&sql)
            .bind(Uuid::new_v4())
            .bind(test_id)
            .bind(&question.prompt)
            .bind(option_a)
            .bind(option_b)
            .bind(option_c)
            .bind(option_d)
            .bind(question.correct_option)
            .bind(&question.explanation)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_question(&self, question_id: Uuid) -> Result<Option<Question>, AppError> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM practice_test_questions WHERE id = $1");
        let question = sqlx::query_as::<_, Question>(&sql)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(question)
    }

    async fn list_questions(&self, test_id: Uuid) -> Result<Vec<Question>, AppError> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM practice_test_questions WHERE test_id = $1 ORDER BY position"
        );
        let questions = sqlx::query_as::<_, Question>(&sql)
            .bind(test_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(questions)
    }

    async fn create_attempt(&self, user_id: Uuid, test_id: Uuid, started_at: DateTime<Utc>) -> Result<Attempt, AppError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM practice_tests WHERE id = $1 FOR SHARE")
            .bind(test_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Err(AppError::NotFound("Test not found".to_string()));
        }

        let sql = format!(
            r#"
            INSERT INTO practice_test_attempts (id, user_id, test_id, started_at, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let attempt = sqlx::query_as::<_, Attempt>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(test_id)
            .bind(started_at)
            .bind(AttemptStatus::InProgress)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(attempt)
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>, AppError> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM practice_test_attempts WHERE id = $1");
        let attempt = sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempt)
    }

    async fn find_open_attempt(&self, user_id: Uuid, test_id: Uuid) -> Result<Option<Attempt>, AppError> {
        let sql = format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM practice_test_attempts
            WHERE user_id = $1 AND test_id = $2 AND status = 'in_progress'
            ORDER BY started_at DESC
            LIMIT 1
            "#
        );
        let attempt = sqlx::query_as::<_, Attempt>(&sql)
            .bind(user_id)
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempt)
    }

    async fn list_attempts_for_user(&self, user_id: Uuid) -> Result<Vec<Attempt>, AppError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM practice_test_attempts WHERE user_id = $1 ORDER BY started_at DESC"
        );
        let attempts = sqlx::query_as::<_, Attempt>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(attempts)
    }

    async fn list_expired_attempts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT a.id
            FROM practice_test_attempts a
            JOIN practice_tests t ON t.id = a.test_id
            WHERE a.status = 'in_progress'
              AND a.started_at + make_interval(mins => t.duration_minutes) <= $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn complete_attempt(&self, attempt_id: Uuid, completion: &Completion) -> Result<Attempt, AppError> {
        let mut tx = self.pool.begin().await?;

        // Same row lock as `upsert_response`: no answer can land between
        // reading the responses and flipping the status.
        let status: Option<AttemptStatus> =
            sqlx::query_scalar("SELECT status FROM practice_test_attempts WHERE id = $1 FOR UPDATE")
                .bind(attempt_id)
                .fetch_optional(&mut *tx)
                .await?;

        match status {
            None => {
                tx.rollback().await?;
                return Err(AppError::NotFound("Attempt not found".to_string()));
            }
            Some(AttemptStatus::Completed) => {
                tx.rollback().await?;
                return self
                    .get_attempt(attempt_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()));
            }
            Some(AttemptStatus::InProgress) => {}
        }

        let selections: HashMap<Uuid, Option<Choice>> = sqlx::query_as::<_, (Uuid, Option<Choice>)>(
            "SELECT question_id, selected FROM practice_test_responses WHERE attempt_id = $1",
        )
        .bind(attempt_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();
        let tally = scorer::score(&completion.keys, &selections);

        let sql = format!(
            r#"
            UPDATE practice_test_attempts
            SET status = $2,
                completed_at = $3,
                score = $4,
                correct_count = $5,
                wrong_count = $6,
                unanswered_count = $7,
                time_taken_seconds = $8
            WHERE id = $1
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let finalized = sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt_id)
            .bind(AttemptStatus::Completed)
            .bind(completion.completed_at)
            .bind(tally.score)
            .bind(tally.correct)
            .bind(tally.wrong)
            .bind(tally.unanswered)
            .bind(completion.time_taken_seconds)
            .fetch_one(&mut *tx)
            .await?;

        let (question_ids, correct): (Vec<Uuid>, Vec<bool>) = tally
            .outcomes
            .iter()
            .map(|(id, outcome)| (*id, *outcome == Outcome::Correct))
            .unzip();

        sqlx::query(
            r#"
            UPDATE practice_test_responses r
            SET is_correct = v.is_correct
            FROM UNNEST($2::uuid[], $3::bool[]) AS v(question_id, is_correct)
            WHERE r.attempt_id = $1 AND r.question_id = v.question_id
            "#,
        )
        .bind(attempt_id)
        .bind(&question_ids)
        .bind(&correct)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(finalized)
    }

    async fn upsert_response(&self, write: ResponseWrite) -> Result<AttemptResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises against `complete_attempt`.
        let status: Option<AttemptStatus> =
            sqlx::query_scalar("SELECT status FROM practice_test_attempts WHERE id = $1 FOR UPDATE")
                .bind(write.attempt_id)
                .fetch_optional(&mut *tx)
                .await?;

        match status {
            None => {
                tx.rollback().await?;
                return Err(AppError::NotFound("Attempt not found".to_string()));
            }
            Some(AttemptStatus::Completed) => {
                tx.rollback().await?;
                return Err(AppError::AttemptCompleted(write.attempt_id));
            }
            Some(AttemptStatus::InProgress) => {}
        }

        let response = sqlx::query_as::<_, AttemptResponse>(
            r#"
            INSERT INTO practice_test_responses (attempt_id, question_id, selected, time_spent_seconds)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (attempt_id, question_id) DO UPDATE SET
                selected = EXCLUDED.selected,
                time_spent_seconds = EXCLUDED.time_spent_seconds,
                updated_at = NOW()
            RETURNING attempt_id, question_id, selected, time_spent_seconds, is_correct, updated_at
            "#,
        )
        .bind(write.attempt_id)
        .bind(write.question_id)
        .bind(write.selected)
        .bind(write.time_spent_seconds)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(response)
    }

    async fn list_responses(&self, attempt_id: Uuid) -> Result<Vec<AttemptResponse>, AppError> {
        let responses = sqlx::query_as::<_, AttemptResponse>(
            r#"
            SELECT attempt_id, question_id, selected, time_spent_seconds, is_correct, updated_at
            FROM practice_test_responses
            WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(responses)
    }
}
