// src/session/mod.rs

//! Client-side driver for taking a practice test: navigation, answer
//! selection with an outbox for unconfirmed writes, the countdown and
//! submission.

pub mod countdown;
pub mod navigator;
pub mod outbox;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

pub use countdown::Countdown;
pub use navigator::Navigator;
pub use outbox::{AnswerSink, FlushReport, Outbox, calculate_backoff};

use crate::{
    attempt::{AttemptService, timer},
    config::{OUTBOX_BACKOFF_BASE_MS, OUTBOX_BACKOFF_MAX_MS, OUTBOX_MAX_RETRIES},
    error::AppError,
    models::{
        attempt::{Attempt, LiveAttempt, LiveQuestion, PendingAnswer},
        practice_test::Choice,
        user::Actor,
    },
};

/// What the user picked locally versus what the store has acknowledged.
#[derive(Debug, Default)]
struct Ledger {
    /// Latest local pick per question, kept until the session ends.
    local: HashMap<Uuid, PendingAnswer>,
    /// Last selection the store accepted per question.
    confirmed: HashMap<Uuid, Option<Choice>>,
    /// The store reported the attempt closed.
    closed: bool,
}

impl Ledger {
    fn selection(&self, question_id: Uuid) -> Option<Choice> {
        match self.local.get(&question_id) {
            Some(answer) => answer.selected,
            None => self.confirmed.get(&question_id).copied().flatten(),
        }
    }

    /// Local picks the store has not acknowledged.
    fn unsaved(&self) -> Vec<PendingAnswer> {
        self.local
            .values()
            .filter(|a| self.confirmed.get(&a.question_id) != Some(&a.selected))
            .cloned()
            .collect()
    }
}

/// Sends outbox entries to the attempt service and records what landed.
#[derive(Clone)]
struct ServiceSink {
    service: AttemptService,
    actor: Actor,
    attempt_id: Uuid,
    ledger: Arc<StdMutex<Ledger>>,
}

impl ServiceSink {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AnswerSink for ServiceSink {
    async fn write(&self, answer: &PendingAnswer) -> Result<(), AppError> {
        let result = self
            .service
            .record_answer(
                &self.actor,
                self.attempt_id,
                answer.question_id,
                answer.selected,
                answer.time_spent_seconds,
            )
            .await;

        match &result {
            Ok(_) => {
                self.ledger().confirmed.insert(answer.question_id, answer.selected);
            }
            Err(AppError::AttemptCompleted(_)) => self.ledger().closed = true,
            Err(_) => {}
        }
        result.map(|_| ())
    }
}

/// One user working through one attempt.
///
/// Local selections are the source of truth for the screen; the store is
/// brought up to date through the outbox. Submission only goes through once
/// every local pick has been acknowledged.
pub struct PracticeSession {
    sink: ServiceSink,
    started_at: DateTime<Utc>,
    duration_minutes: i32,
    questions: Vec<LiveQuestion>,
    navigator: Navigator,
    outbox: Arc<Mutex<Outbox>>,
    countdown: Option<Countdown>,
}

impl PracticeSession {
    /// Loads the live view of an attempt and builds a session on top of it.
    pub async fn open(service: AttemptService, actor: Actor, attempt_id: Uuid) -> Result<Self, AppError> {
        let live = service.live(&actor, attempt_id).await?;
        Ok(Self::from_live(service, actor, live))
    }

    pub fn from_live(service: AttemptService, actor: Actor, live: LiveAttempt) -> Self {
        let ledger = Ledger {
            confirmed: live
                .questions
                .iter()
                .filter(|q| q.selected.is_some())
                .map(|q| (q.id, q.selected))
                .collect(),
            ..Ledger::default()
        };
        let navigator = Navigator::new(
            live.questions.iter().map(|q| q.id).collect(),
            live.questions.iter().filter(|q| q.selected.is_some()).map(|q| q.id),
        );

        Self {
            sink: ServiceSink {
                service,
                actor,
                attempt_id: live.attempt.id,
                ledger: Arc::new(StdMutex::new(ledger)),
            },
            started_at: live.attempt.started_at,
            duration_minutes: live.duration_minutes,
            questions: live.questions,
            navigator,
            outbox: Arc::new(Mutex::new(Outbox::default())),
            countdown: None,
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.sink.attempt_id
    }

    pub fn current_index(&self) -> usize {
        self.navigator.current_index()
    }

    pub fn current_question(&self) -> Option<&LiveQuestion> {
        self.questions.get(self.navigator.current_index())
    }

    /// The local selection for the current question.
    pub fn current_selection(&self) -> Option<Choice> {
        self.navigator
            .current_question()
            .and_then(|id| self.sink.ledger().selection(id))
    }

    pub fn go_to(&mut self, index: usize) -> bool {
        self.navigator.go_to(index)
    }

    pub fn next(&mut self) -> bool {
        self.navigator.next()
    }

    pub fn previous(&mut self) -> bool {
        self.navigator.previous()
    }

    pub fn answered_count(&self) -> usize {
        self.navigator.answered_count()
    }

    pub fn question_count(&self) -> usize {
        self.navigator.len()
    }

    /// Always derived from the stored start time.
    pub fn remaining_seconds(&self) -> i64 {
        timer::remaining_seconds(self.started_at, self.duration_minutes, Utc::now())
    }

    /// Local picks the store has not acknowledged yet.
    pub fn unsaved_count(&self) -> usize {
        self.sink.ledger().unsaved().len()
    }

    /// Selects an option on the current question and tries to persist it.
    /// Write failures stay in the outbox; they never reach the caller.
    pub async fn select(&mut self, choice: Choice) -> FlushReport {
        self.record(Some(choice)).await
    }

    pub async fn clear_selection(&mut self) -> FlushReport {
        self.record(None).await
    }

    /// Retries whatever is due in the outbox. Meant to be called
    /// periodically by the screen driving the session.
    pub async fn sync(&self) -> FlushReport {
        self.outbox.lock().await.flush(&self.sink, false).await
    }

    /// Pushes every unacknowledged answer, then submits.
    ///
    /// Answers the outbox gave up on are queued again first. While any local
    /// pick is still unacknowledged the submission is refused with a
    /// retryable error; finalize itself is safe to repeat. If the store
    /// already refused writes because time ran out, the held picks go along
    /// with the submission instead.
    pub async fn submit(&mut self) -> Result<Attempt, AppError> {
        let mut outbox = self.outbox.lock().await;
        for answer in self.sink.ledger().unsaved() {
            outbox.enqueue(answer);
        }
        outbox.flush(&self.sink, true).await;
        drop(outbox);

        let (unsaved, closed) = {
            let ledger = self.sink.ledger();
            (ledger.unsaved(), ledger.closed)
        };
        if !unsaved.is_empty() && !closed {
            return Err(AppError::InternalServerError(format!(
                "{} answer(s) not saved yet",
                unsaved.len()
            )));
        }

        // Time ran out under us: the held picks still count inside the grace period.
        let attempt = self
            .sink
            .service
            .finalize_with(&self.sink.actor, self.sink.attempt_id, &unsaved)
            .await?;
        self.countdown = None;
        info!(attempt_id = %attempt.id, "Attempt submitted");
        Ok(attempt)
    }

    /// Starts the one-second countdown. At zero every unacknowledged answer
    /// is handed to `AttemptService::finalize_with`, which writes them and
    /// closes the attempt.
    pub fn start_countdown(&mut self) -> watch::Receiver<i64> {
        let sink = self.sink.clone();
        let outbox = self.outbox.clone();

        let countdown = Countdown::spawn(self.started_at, self.duration_minutes, move || async move {
            // Held for the whole hand-over so no flush races it.
            let _outbox = outbox.lock().await;
            let held = sink.ledger().unsaved();
            force_submit(&sink, &held).await;
        });
        let updates = countdown.subscribe();
        self.countdown = Some(countdown);
        updates
    }

    async fn record(&mut self, selected: Option<Choice>) -> FlushReport {
        let Some(question_id) = self.navigator.current_question() else {
            return FlushReport::default();
        };

        self.navigator.mark_answered(question_id, selected.is_some());
        let time_spent_seconds = i32::try_from(self.navigator.time_on_current()).unwrap_or(i32::MAX);
        let answer = PendingAnswer {
            question_id,
            selected,
            time_spent_seconds,
        };
        self.sink.ledger().local.insert(question_id, answer.clone());

        let mut outbox = self.outbox.lock().await;
        outbox.enqueue(answer);
        outbox.flush(&self.sink, false).await
    }
}

/// Closes the attempt on expiry, retrying transient failures with the
/// outbox's backoff before falling back to a plain finalize.
async fn force_submit(sink: &ServiceSink, held: &[PendingAnswer]) {
    let mut retry: u8 = 0;
    loop {
        match sink.service.finalize_with(&sink.actor, sink.attempt_id, held).await {
            Ok(attempt) => {
                {
                    let mut ledger = sink.ledger();
                    for answer in held {
                        ledger.confirmed.insert(answer.question_id, answer.selected);
                    }
                    ledger.closed = true;
                }
                info!(attempt_id = %attempt.id, saved = held.len(), "Time is up, attempt submitted");
                return;
            }
            Err(e) if e.is_retryable() && retry < OUTBOX_MAX_RETRIES => {
                retry += 1;
                let delay = calculate_backoff(retry, OUTBOX_BACKOFF_BASE_MS, OUTBOX_BACKOFF_MAX_MS);
                warn!(attempt_id = %sink.attempt_id, retry, error = %e, "Forced submission failed, will retry");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(attempt_id = %sink.attempt_id, error = %e, "Forced submission failed, closing without held answers");
                if let Err(e) = sink.service.finalize(sink.attempt_id).await {
                    error!(attempt_id = %sink.attempt_id, error = %e, "Forced submission failed");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::{
        models::{
            attempt::AttemptStatus,
            practice_test::{NewQuestion, NewTest},
        },
        store::{MemoryStore, Store},
    };

    async fn setup(correct: &[Choice], started_ago: ChronoDuration) -> (Arc<MemoryStore>, AttemptService, Actor, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let test = store
            .create_test(NewTest {
                title: "Session".into(),
                description: None,
                duration_minutes: 1,
                passing_score: 50.0,
            })
            .await
            .unwrap();
        for c in correct {
            store
                .add_question(
                    test.id,
                    NewQuestion {
                        prompt: "?".into(),
                        options: ["a".into(), "b".into(), "c".into(), "d".into()],
                        correct_option: *c,
                        explanation: None,
                    },
                )
                .await
                .unwrap();
        }
        let actor = Actor {
            user_id: Uuid::new_v4(),
            role: "user".into(),
        };
        let attempt = store
            .create_attempt(actor.user_id, test.id, Utc::now() - started_ago)
            .await
            .unwrap();
        (store.clone(), AttemptService::new(store), actor, attempt.id)
    }

    #[tokio::test]
    async fn test_session_flow_submits_and_scores() {
        let (_, service, actor, attempt_id) =
            setup(&[Choice::A, Choice::B, Choice::C], ChronoDuration::zero()).await;
        let mut session = PracticeSession::open(service, actor, attempt_id).await.unwrap();

        assert_eq!(session.question_count(), 3);
        session.select(Choice::A).await;
        assert!(session.next());
        session.select(Choice::D).await;
        assert!(!session.go_to(7));
        assert_eq!(session.current_index(), 1);
        assert_eq!(session.answered_count(), 2);

        let attempt = session.submit().await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Completed);
        assert_eq!((attempt.correct_count, attempt.wrong_count, attempt.unanswered_count), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_failed_write_is_kept_and_retried_on_submit() {
        let (store, service, actor, attempt_id) = setup(&[Choice::B], ChronoDuration::zero()).await;
        let mut session = PracticeSession::open(service, actor, attempt_id).await.unwrap();

        store.fail_next_writes(1);
        let report = session.select(Choice::B).await;
        assert_eq!(report.retrying, 1);
        assert_eq!(session.unsaved_count(), 1);
        // Local state is unaffected by the failed write.
        assert_eq!(session.current_selection(), Some(Choice::B));

        let attempt = session.submit().await.unwrap();
        assert_eq!(session.unsaved_count(), 0);
        assert_eq!(attempt.correct_count, 1);
    }

    #[tokio::test]
    async fn test_submit_refused_while_answers_unsaved() {
        let (store, service, actor, attempt_id) = setup(&[Choice::B], ChronoDuration::zero()).await;
        let mut session = PracticeSession::open(service.clone(), actor, attempt_id).await.unwrap();

        store.fail_next_writes(2);
        session.select(Choice::B).await;
        let err = session.submit().await.unwrap_err();
        assert!(err.is_retryable());

        let stored = store.get_attempt(attempt_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::InProgress);

        // Store is back: retrying the submission succeeds.
        let attempt = session.submit().await.unwrap();
        assert_eq!(attempt.correct_count, 1);
    }

    #[tokio::test]
    async fn test_countdown_forces_submission() {
        let (store, service, actor, attempt_id) = setup(&[Choice::A], ChronoDuration::seconds(58)).await;
        let mut session = PracticeSession::open(service, actor, attempt_id).await.unwrap();
        session.select(Choice::C).await;

        let mut remaining = session.start_countdown();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *remaining.borrow_and_update() > 0 {
                if remaining.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .expect("countdown should reach zero");

        let mut completed = None;
        for _ in 0..100 {
            let attempt = store.get_attempt(attempt_id).await.unwrap().unwrap();
            if attempt.is_completed() {
                completed = Some(attempt);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let attempt = completed.expect("attempt should be finalized on expiry");
        assert_eq!(attempt.wrong_count, 1);
    }

    #[tokio::test]
    async fn test_open_redirects_for_expired_attempt() {
        let (_, service, actor, attempt_id) = setup(&[Choice::A], ChronoDuration::minutes(5)).await;
        let err = PracticeSession::open(service, actor, attempt_id)
            .await
            .err()
            .unwrap();
        assert_eq!(err, AppError::AttemptCompleted(attempt_id));
    }

    #[tokio::test]
    async fn test_submit_never_drops_an_exhausted_answer() {
        let (store, service, actor, attempt_id) = setup(&[Choice::B], ChronoDuration::zero()).await;
        let mut session = PracticeSession::open(service, actor, attempt_id).await.unwrap();

        // One failure on select, then more failed submissions than the
        // outbox retries a single entry.
        let failures = usize::from(OUTBOX_MAX_RETRIES) + 1;
        store.fail_next_writes(failures);
        session.select(Choice::B).await;

        for _ in 1..failures {
            let err = session.submit().await.unwrap_err();
            assert!(err.is_retryable());
            assert_eq!(session.current_selection(), Some(Choice::B));
        }

        let attempt = session.submit().await.unwrap();
        assert_eq!((attempt.correct_count, attempt.unanswered_count), (1, 0));
    }

    #[tokio::test]
    async fn test_sync_retries_once_backoff_elapses() {
        let (store, service, actor, attempt_id) = setup(&[Choice::A], ChronoDuration::zero()).await;
        let mut session = PracticeSession::open(service, actor, attempt_id).await.unwrap();

        store.fail_next_writes(1);
        session.select(Choice::A).await;
        assert_eq!(session.sync().await, FlushReport::default());

        // First backoff is at most base + 25%.
        tokio::time::sleep(Duration::from_millis(OUTBOX_BACKOFF_BASE_MS * 5 / 4 + 50)).await;
        let report = session.sync().await;
        assert_eq!(report.written, 1);
        assert_eq!(session.unsaved_count(), 0);
        assert_eq!(store.list_responses(attempt_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_countdown_saves_answer_still_pending_at_expiry() {
        let (store, service, actor, attempt_id) = setup(&[Choice::B], ChronoDuration::seconds(58)).await;
        let mut session = PracticeSession::open(service, actor, attempt_id).await.unwrap();

        store.fail_next_writes(1);
        session.select(Choice::B).await;
        assert_eq!(session.unsaved_count(), 1);

        session.start_countdown();
        let mut completed = None;
        for _ in 0..250 {
            let attempt = store.get_attempt(attempt_id).await.unwrap().unwrap();
            if attempt.is_completed() {
                completed = Some(attempt);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let attempt = completed.expect("attempt should be finalized on expiry");
        assert_eq!((attempt.correct_count, attempt.unanswered_count), (1, 0));
    }

    #[tokio::test]
    async fn test_submit_after_deadline_carries_refused_answer() {
        let (store, service, actor, attempt_id) = setup(&[Choice::B], ChronoDuration::seconds(59)).await;
        let mut session = PracticeSession::open(service, actor, attempt_id).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        // The store refuses the write but keeps the attempt open for the grace period.
        session.select(Choice::B).await;
        assert_eq!(session.unsaved_count(), 1);
        assert!(!store.get_attempt(attempt_id).await.unwrap().unwrap().is_completed());

        let attempt = session.submit().await.unwrap();
        assert_eq!(attempt.status, AttemptStatus::Completed);
        assert_eq!((attempt.correct_count, attempt.unanswered_count), (1, 0));
    }
}
