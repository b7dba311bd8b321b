// src/session/outbox.rs

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, warn};

use crate::{
    config::{OUTBOX_BACKOFF_BASE_MS, OUTBOX_BACKOFF_MAX_MS, OUTBOX_MAX_RETRIES},
    error::AppError,
    models::attempt::PendingAnswer,
};

/// Where flushed answers go.
#[async_trait]
pub trait AnswerSink: Send + Sync {
    async fn write(&self, answer: &PendingAnswer) -> Result<(), AppError>;
}

#[derive(Debug)]
struct Entry {
    answer: PendingAnswer,
    /// Failed writes so far.
    attempt: u8,
    not_before: Instant,
}

/// Outcome of one flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub retrying: usize,
    pub dropped: usize,
}

/// Queue of answer writes with bounded retry.
///
/// Holds at most one entry per question; a newer selection replaces the
/// pending one. Failed writes back off exponentially and are dropped after
/// `max_retries` or on a non-retryable error.
#[derive(Debug)]
pub struct Outbox {
    entries: VecDeque<Entry>,
    max_retries: u8,
    base_ms: u64,
    max_ms: u64,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(OUTBOX_MAX_RETRIES, OUTBOX_BACKOFF_BASE_MS, OUTBOX_BACKOFF_MAX_MS)
    }
}

impl Outbox {
    pub fn new(max_retries: u8, base_ms: u64, max_ms: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            max_retries,
            base_ms,
            max_ms,
        }
    }

    pub fn enqueue(&mut self, answer: PendingAnswer) {
        let now = Instant::now();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.answer.question_id == answer.question_id)
        {
            entry.answer = answer;
            entry.attempt = 0;
            entry.not_before = now;
            return;
        }
        self.entries.push_back(Entry {
            answer,
            attempt: 0,
            not_before: now,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every due entry. `force` ignores backoff delays (used before
    /// submission and on expiry).
    pub async fn flush(&mut self, sink: &dyn AnswerSink, force: bool) -> FlushReport {
        let mut report = FlushReport::default();
        let mut kept = VecDeque::with_capacity(self.entries.len());

        while let Some(mut entry) = self.entries.pop_front() {
            let now = Instant::now();
            if !force && entry.not_before > now {
                kept.push_back(entry);
                continue;
            }

            match sink.write(&entry.answer).await {
                Ok(()) => report.written += 1,
                Err(e) if e.is_retryable() => {
                    entry.attempt = entry.attempt.saturating_add(1);
                    if entry.attempt > self.max_retries {
                        error!(
                            question_id = %entry.answer.question_id,
                            attempts = entry.attempt,
                            error = %e,
                            "Giving up on answer write"
                        );
                        report.dropped += 1;
                        continue;
                    }
                    let delay = calculate_backoff(entry.attempt, self.base_ms, self.max_ms);
                    warn!(
                        question_id = %entry.answer.question_id,
                        attempt = entry.attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Answer write failed, will retry"
                    );
                    entry.not_before = now + delay;
                    report.retrying += 1;
                    kept.push_back(entry);
                }
                Err(e) => {
                    warn!(
                        question_id = %entry.answer.question_id,
                        error = %e,
                        "Answer write rejected, dropping"
                    );
                    report.dropped += 1;
                }
            }
        }

        self.entries = kept;
        report
    }
}

/// Exponential backoff with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow(u32::from(attempt - 1));
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}
