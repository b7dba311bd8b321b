// src/store/memory.rs

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Completion, Store};
use crate::{
    attempt::{
        scorer::{self, Outcome},
        timer,
    },
    error::AppError,
    models::{
        attempt::{Attempt, AttemptResponse, AttemptStatus, ResponseWrite},
        practice_test::{Choice, NewQuestion, NewTest, Question, TestDefinition},
        user::User,
    },
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tests: HashMap<Uuid, TestDefinition>,
    questions: HashMap<Uuid, Question>,
    attempts: HashMap<Uuid, Attempt>,
    responses: HashMap<(Uuid, Uuid), AttemptResponse>,
}

/// In-process `Store` backing the test suite and the HTTP integration tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// Number of upcoming `upsert_response` calls that fail as if the
    /// database were unreachable.
    #[cfg(test)]
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` response writes fail with a retryable error.
    #[cfg(test)]
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_injected_failure(&self) -> bool {
        false
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, username: &str, password_hash: &str, role: &str) -> Result<User, AppError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == username) {
            return Err(AppError::Conflict(format!("Username '{}' already exists", username)));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password: password_hash.to_string(),
            role: role.to_string(),
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn create_test(&self, test: NewTest) -> Result<TestDefinition, AppError> {
        let definition = TestDefinition {
            id: Uuid::new_v4(),
            title: test.title,
            description: test.description,
            duration_minutes: test.duration_minutes,
            passing_score: test.passing_score,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .tests
            .insert(definition.id, definition.clone());
        Ok(definition)
    }

    async fn list_tests(&self) -> Result<Vec<TestDefinition>, AppError> {
        let tables = self.tables.read().await;
        let mut tests: Vec<TestDefinition> = tables.tests.values().cloned().collect();
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tests)
    }

    async fn get_test(&self, test_id: Uuid) -> Result<Option<TestDefinition>, AppError> {
        Ok(self.tables.read().await.tests.get(&test_id).cloned())
    }

    async fn add_question(&self, test_id: Uuid, question: NewQuestion) -> Result<Question, AppError> {
        let mut tables = self.tables.write().await;
        if !tables.tests.contains_key(&test_id) {
            return Err(AppError::NotFound("Test not found".to_string()));
        }
        if tables.attempts.values().any(|a| a.test_id == test_id) {
            return Err(AppError::Conflict(
                "Test has already been taken; its questions are frozen".to_string(),
            ));
        }
        let position = tables
            .questions
            .values()
            .filter(|q| q.test_id == test_id)
            .map(|q| q.position)
            .max()
            .unwrap_or(0)
            + 1;
        let [option_a, option_b, option_c, option_d] = question.options;
        let row = Question {
            id: Uuid::new_v4(),
            test_id,
            position,
            prompt: question.prompt,
            option_a,
            option_b,
            option_c,
            option_d,
            correct_option: question.correct_option,
            explanation: question.explanation,
        };
        tables.questions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_question(&self, question_id: Uuid) -> Result<Option<Question>, AppError> {
        Ok(self.tables.read().await.questions.get(&question_id).cloned())
    }

    async fn list_questions(&self, test_id: Uuid) -> Result<Vec<Question>, AppError> {
        let tables = self.tables.read().await;
        let mut questions: Vec<Question> = tables
            .questions
            .values()
            .filter(|q| q.test_id == test_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        Ok(questions)
    }

    async fn create_attempt(&self, user_id: Uuid, test_id: Uuid, started_at: DateTime<Utc>) -> Result<Attempt, AppError> {
        let mut tables = self.tables.write().await;
        if !tables.tests.contains_key(&test_id) {
            return Err(AppError::NotFound("Test not found".to_string()));
        }
        let attempt = Attempt {
            id: Uuid::new_v4(),
            user_id,
            test_id,
            started_at,
            completed_at: None,
            status: AttemptStatus::InProgress,
            score: None,
            correct_count: 0,
            wrong_count: 0,
            unanswered_count: 0,
            time_taken_seconds: None,
        };
        tables.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>, AppError> {
        Ok(self.tables.read().await.attempts.get(&attempt_id).cloned())
    }

    async fn find_open_attempt(&self, user_id: Uuid, test_id: Uuid) -> Result<Option<Attempt>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.test_id == test_id && !a.is_completed())
            .max_by_key(|a| a.started_at)
            .cloned())
    }

    async fn list_attempts_for_user(&self, user_id: Uuid) -> Result<Vec<Attempt>, AppError> {
        let tables = self.tables.read().await;
        let mut attempts: Vec<Attempt> = tables
            .attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(attempts)
    }

    async fn list_expired_attempts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .attempts
            .values()
            .filter(|a| !a.is_completed())
            .filter(|a| {
                tables
                    .tests
                    .get(&a.test_id)
                    .is_some_and(|t| timer::deadline(a.started_at, t.duration_minutes) <= cutoff)
            })
            .map(|a| a.id)
            .collect())
    }

    async fn complete_attempt(&self, attempt_id: Uuid, completion: &Completion) -> Result<Attempt, AppError> {
        let mut tables = self.tables.write().await;
        let Tables {
            attempts, responses, ..
        } = &mut *tables;

        let attempt = attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        if attempt.is_completed() {
            return Ok(attempt.clone());
        }

        let selections: HashMap<Uuid, Option<Choice>> = responses
            .values()
            .filter(|r| r.attempt_id == attempt_id)
            .map(|r| (r.question_id, r.selected))
            .collect();
        let tally = scorer::score(&completion.keys, &selections);

        attempt.status = AttemptStatus::Completed;
        attempt.completed_at = Some(completion.completed_at);
        attempt.score = Some(tally.score);
        attempt.correct_count = tally.correct;
        attempt.wrong_count = tally.wrong;
        attempt.unanswered_count = tally.unanswered;
        attempt.time_taken_seconds = Some(completion.time_taken_seconds);

        for ((a_id, q_id), response) in responses.iter_mut() {
            if *a_id != attempt_id {
                continue;
            }
            if let Some(outcome) = tally.outcomes.get(q_id) {
                response.is_correct = Some(*outcome == Outcome::Correct);
            }
        }

        Ok(attempt.clone())
    }

    async fn upsert_response(&self, write: ResponseWrite) -> Result<AttemptResponse, AppError> {
        if self.take_injected_failure() {
            return Err(AppError::InternalServerError("connection refused".to_string()));
        }

        let mut tables = self.tables.write().await;
        let attempt = tables
            .attempts
            .get(&write.attempt_id)
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        if attempt.is_completed() {
            return Err(AppError::AttemptCompleted(write.attempt_id));
        }

        let response = AttemptResponse {
            attempt_id: write.attempt_id,
            question_id: write.question_id,
            selected: write.selected,
            time_spent_seconds: write.time_spent_seconds,
            is_correct: None,
            updated_at: Utc::now(),
        };
        tables
            .responses
            .insert((write.attempt_id, write.question_id), response.clone());
        Ok(response)
    }

    async fn list_responses(&self, attempt_id: Uuid) -> Result<Vec<AttemptResponse>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .responses
            .values()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryStore, TestDefinition, Question) {
        let store = MemoryStore::new();
        let test = store
            .create_test(NewTest {
                title: "Mock".into(),
                description: None,
                duration_minutes: 5,
                passing_score: 40.0,
            })
            .await
            .unwrap();
        let question = store
            .add_question(
                test.id,
                NewQuestion {
                    prompt: "Pick B".into(),
                    options: ["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_option: Choice::B,
                    explanation: None,
                },
            )
            .await
            .unwrap();
        (store, test, question)
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_question() {
        let (store, test, question) = seeded().await;
        let attempt = store
            .create_attempt(Uuid::new_v4(), test.id, Utc::now())
            .await
            .unwrap();

        for selected in [Choice::B, Choice::D] {
            store
                .upsert_response(ResponseWrite {
                    attempt_id: attempt.id,
                    question_id: question.id,
                    selected: Some(selected),
                    time_spent_seconds: 3,
                })
                .await
                .unwrap();
        }

        let responses = store.list_responses(attempt.id).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].selected, Some(Choice::D));
    }

    #[tokio::test]
    async fn test_positions_are_sequential() {
        let (store, test, first) = seeded().await;
        let second = store
            .add_question(
                test.id,
                NewQuestion {
                    prompt: "Pick A".into(),
                    options: ["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_option: Choice::A,
                    explanation: None,
                },
            )
            .await
            .unwrap();
        assert_eq!((first.position, second.position), (1, 2));
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.create_user("asha", "hash", "user").await.unwrap();
        let err = store.create_user("asha", "hash", "user").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let (store, test, question) = seeded().await;
        let attempt = store
            .create_attempt(Uuid::new_v4(), test.id, Utc::now())
            .await
            .unwrap();
        let write = ResponseWrite {
            attempt_id: attempt.id,
            question_id: question.id,
            selected: Some(Choice::A),
            time_spent_seconds: 0,
        };

        store.fail_next_writes(1);
        let err = store.upsert_response(write.clone()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.upsert_response(write).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_attempts_are_listed() {
        let (store, test, _) = seeded().await;
        let stale = store
            .create_attempt(Uuid::new_v4(), test.id, Utc::now() - chrono::Duration::minutes(6))
            .await
            .unwrap();
        store
            .create_attempt(Uuid::new_v4(), test.id, Utc::now())
            .await
            .unwrap();

        let expired = store.list_expired_attempts(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![stale.id]);
    }

    #[tokio::test]
    async fn test_questions_are_frozen_once_attempted() {
        let (store, test, _) = seeded().await;
        store
            .create_attempt(Uuid::new_v4(), test.id, Utc::now())
            .await
            .unwrap();

        let err = store
            .add_question(
                test.id,
                NewQuestion {
                    prompt: "Late addition".into(),
                    options: ["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_option: Choice::C,
                    explanation: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.list_questions(test.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_scores_stored_responses() {
        let (store, test, question) = seeded().await;
        let attempt = store
            .create_attempt(Uuid::new_v4(), test.id, Utc::now())
            .await
            .unwrap();
        store
            .upsert_response(ResponseWrite {
                attempt_id: attempt.id,
                question_id: question.id,
                selected: Some(Choice::B),
                time_spent_seconds: 4,
            })
            .await
            .unwrap();

        let completion = Completion {
            completed_at: Utc::now(),
            time_taken_seconds: 4,
            keys: vec![scorer::AnswerKey::from(&question)],
        };
        let done = store.complete_attempt(attempt.id, &completion).await.unwrap();
        assert_eq!((done.correct_count, done.score), (1, Some(100.0)));

        let responses = store.list_responses(attempt.id).await.unwrap();
        assert_eq!(responses[0].is_correct, Some(true));
    }
}
