// src/attempt/service.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    results::AttemptResults,
    scorer::AnswerKey,
    timer,
};
use crate::{
    config::EXPIRY_GRACE_SECS,
    error::AppError,
    models::{
        attempt::{Attempt, AttemptResponse, LiveAttempt, LiveQuestion, PendingAnswer, ResponseWrite},
        practice_test::{Choice, TestDefinition},
        user::Actor,
    },
    store::{Completion, Store},
};

/// Attempt lifecycle: start, answer, finalize, review.
///
/// Holds only an injected `Store`, so it is cheap to clone into handlers,
/// background tasks and client sessions.
#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn Store>,
}

impl AttemptService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Opens a new attempt, or resumes the caller's unexpired open attempt
    /// for the same test.
    pub async fn start(&self, actor: &Actor, test_id: Uuid) -> Result<Attempt, AppError> {
        let test = self
            .store
            .get_test(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Test not found".to_string()))?;

        if self.store.list_questions(test_id).await?.is_empty() {
            return Err(AppError::BadRequest("Test has no questions yet".to_string()));
        }

        let now = Utc::now();
        if let Some(open) = self.store.find_open_attempt(actor.user_id, test_id).await? {
            if !timer::is_expired(open.started_at, test.duration_minutes, now) {
                info!(attempt_id = %open.id, "Resuming open attempt");
                return Ok(open);
            }
            self.finalize(open.id).await?;
        }

        let attempt = self.store.create_attempt(actor.user_id, test_id, now).await?;
        info!(attempt_id = %attempt.id, test_id = %test_id, user_id = %actor.user_id, "Attempt started");
        Ok(attempt)
    }

    /// The "take test" view. Closed attempts answer with `AttemptCompleted`.
    pub async fn live(&self, actor: &Actor, attempt_id: Uuid) -> Result<LiveAttempt, AppError> {
        let (attempt, test) = self.load_owned(actor, attempt_id).await?;
        let now = Utc::now();
        let attempt = self.settle(attempt, &test, now).await?;
        if attempt.is_completed() {
            return Err(AppError::AttemptCompleted(attempt.id));
        }

        let questions = self.store.list_questions(test.id).await?;
        let selections = selections(self.store.list_responses(attempt.id).await?);

        let questions: Vec<LiveQuestion> = questions
            .iter()
            .map(|q| LiveQuestion {
                id: q.id,
                position: q.position,
                prompt: q.prompt.clone(),
                options: q.options(),
                selected: selections.get(&q.id).copied().flatten(),
            })
            .collect();
        let answered_count = questions.iter().filter(|q| q.selected.is_some()).count();

        Ok(LiveAttempt {
            remaining_seconds: timer::remaining_seconds(attempt.started_at, test.duration_minutes, now),
            attempt,
            test_title: test.title,
            duration_minutes: test.duration_minutes,
            answered_count,
            questions,
        })
    }

    /// Upserts the caller's selection for one question.
    ///
    /// A write that arrives after time ran out is rejected with
    /// `AttemptCompleted`. Past the grace period it also closes the attempt;
    /// inside it the attempt stays open for `finalize_with`.
    pub async fn record_answer(
        &self,
        actor: &Actor,
        attempt_id: Uuid,
        question_id: Uuid,
        selected: Option<Choice>,
        time_spent_seconds: i32,
    ) -> Result<AttemptResponse, AppError> {
        let (attempt, test) = self.load_owned(actor, attempt_id).await?;
        let now = Utc::now();
        if attempt.is_completed() {
            return Err(AppError::AttemptCompleted(attempt.id));
        }
        if timer::is_expired(attempt.started_at, test.duration_minutes, now) {
            if now > grace_cutoff(&attempt, &test) {
                self.settle(attempt, &test, now).await?;
            }
            return Err(AppError::AttemptCompleted(attempt_id));
        }

        let question = self
            .store
            .get_question(question_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;
        if question.test_id != attempt.test_id {
            return Err(AppError::BadRequest(
                "Question does not belong to this test".to_string(),
            ));
        }

        let response = self
            .store
            .upsert_response(ResponseWrite {
                attempt_id,
                question_id,
                selected,
                time_spent_seconds: time_spent_seconds.max(0),
            })
            .await?;
        debug!(attempt_id = %attempt_id, question_id = %question_id, ?selected, "Answer recorded");
        Ok(response)
    }

    /// Manual submission by the attempt owner.
    pub async fn submit(&self, actor: &Actor, attempt_id: Uuid) -> Result<Attempt, AppError> {
        self.load_owned(actor, attempt_id).await?;
        self.finalize(attempt_id).await
    }

    /// Scores and closes an attempt. Manual submission, the client countdown
    /// and the reaper all end up here.
    ///
    /// Already-completed attempts are returned as stored, so retrying after a
    /// failure never double-counts.
    pub async fn finalize(&self, attempt_id: Uuid) -> Result<Attempt, AppError> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        if attempt.is_completed() {
            debug!(attempt_id = %attempt_id, "Attempt already finalized");
            return Ok(attempt);
        }

        let test = self.test_of(&attempt).await?;
        let keys: Vec<AnswerKey> = self
            .store
            .list_questions(test.id)
            .await?
            .iter()
            .map(AnswerKey::from)
            .collect();
        let now = Utc::now();
        // Attempts closed late (reaper, lazy expiry) are charged the full duration at most.
        let time_taken_seconds = (now - attempt.started_at)
            .num_seconds()
            .clamp(0, test.duration_seconds());

        let finalized = self
            .store
            .complete_attempt(
                attempt_id,
                &Completion {
                    completed_at: now,
                    time_taken_seconds,
                    keys,
                },
            )
            .await?;

        info!(
            attempt_id = %attempt_id,
            score = ?finalized.score,
            correct = finalized.correct_count,
            wrong = finalized.wrong_count,
            unanswered = finalized.unanswered_count,
            "Attempt finalized"
        );
        Ok(finalized)
    }

    /// Closes an attempt whose countdown ran out while the client still held
    /// answers it had not saved.
    ///
    /// Lazy expiry rejects every write once the deadline has passed, so the
    /// held answers are written here first, as long as they arrive within
    /// `EXPIRY_GRACE_SECS` of the deadline. Later ones are discarded.
    pub async fn finalize_with(
        &self,
        actor: &Actor,
        attempt_id: Uuid,
        answers: &[PendingAnswer],
    ) -> Result<Attempt, AppError> {
        let (attempt, test) = self.load_owned(actor, attempt_id).await?;
        if attempt.is_completed() {
            if !answers.is_empty() {
                warn!(attempt_id = %attempt_id, unsaved = answers.len(), "Attempt closed before held answers arrived");
            }
            return Ok(attempt);
        }

        if Utc::now() <= grace_cutoff(&attempt, &test) {
            let question_ids: HashSet<Uuid> = self
                .store
                .list_questions(test.id)
                .await?
                .iter()
                .map(|q| q.id)
                .collect();
            for answer in answers.iter().filter(|a| question_ids.contains(&a.question_id)) {
                self.store
                    .upsert_response(ResponseWrite {
                        attempt_id,
                        question_id: answer.question_id,
                        selected: answer.selected,
                        time_spent_seconds: answer.time_spent_seconds.max(0),
                    })
                    .await?;
            }
        } else if !answers.is_empty() {
            warn!(attempt_id = %attempt_id, unsaved = answers.len(), "Held answers arrived after the grace period");
        }

        self.finalize(attempt_id).await
    }

    /// Results of a completed attempt. Running attempts answer with
    /// `AttemptInProgress` so nothing is disclosed early.
    pub async fn results(&self, actor: &Actor, attempt_id: Uuid) -> Result<AttemptResults, AppError> {
        let (attempt, test) = self.load_owned(actor, attempt_id).await?;
        let attempt = self.settle(attempt, &test, Utc::now()).await?;
        if !attempt.is_completed() {
            return Err(AppError::AttemptInProgress(attempt.id));
        }

        let questions = self.store.list_questions(test.id).await?;
        let responses = self.store.list_responses(attempt.id).await?;
        Ok(AttemptResults::build(attempt, &test, &questions, responses))
    }

    /// The caller's attempts, newest first.
    pub async fn history(&self, actor: &Actor) -> Result<Vec<Attempt>, AppError> {
        self.store.list_attempts_for_user(actor.user_id).await
    }

    /// Finalizes every attempt whose time ran out more than the grace period
    /// ago. Returns how many were closed.
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self
            .store
            .list_expired_attempts(now - Duration::seconds(EXPIRY_GRACE_SECS))
            .await?;
        let mut closed = 0;
        for attempt_id in expired {
            match self.finalize(attempt_id).await {
                Ok(_) => closed += 1,
                Err(e) => error!(attempt_id = %attempt_id, error = %e, "Failed to finalize expired attempt"),
            }
        }
        Ok(closed)
    }

    async fn load_owned(&self, actor: &Actor, attempt_id: Uuid) -> Result<(Attempt, TestDefinition), AppError> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))?;
        if !actor.can_access(attempt.user_id) {
            return Err(AppError::Forbidden("Not your attempt".to_string()));
        }
        let test = self.test_of(&attempt).await?;
        Ok((attempt, test))
    }

    async fn test_of(&self, attempt: &Attempt) -> Result<TestDefinition, AppError> {
        self.store.get_test(attempt.test_id).await?.ok_or_else(|| {
            AppError::InternalServerError(format!(
                "Attempt {} references missing test {}",
                attempt.id, attempt.test_id
            ))
        })
    }

    /// Lazy expiry: an open attempt whose time is up is finalized on read.
    async fn settle(&self, attempt: Attempt, test: &TestDefinition, now: DateTime<Utc>) -> Result<Attempt, AppError> {
        if !attempt.is_completed() && timer::is_expired(attempt.started_at, test.duration_minutes, now) {
            info!(attempt_id = %attempt.id, "Attempt expired, finalizing");
            return self.finalize(attempt.id).await;
        }
        Ok(attempt)
    }
}

/// Last moment held answers are still accepted for an attempt.
fn grace_cutoff(attempt: &Attempt, test: &TestDefinition) -> DateTime<Utc> {
    timer::deadline(attempt.started_at, test.duration_minutes) + Duration::seconds(EXPIRY_GRACE_SECS)
}

fn selections(responses: Vec<AttemptResponse>) -> HashMap<Uuid, Option<Choice>> {
    responses
        .into_iter()
        .map(|r| (r.question_id, r.selected))
        .collect()
}
