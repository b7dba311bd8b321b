// src/session/navigator.rs

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// In-memory position within an attempt. Nothing here is persisted; a reload
/// starts again at the first question while recorded answers survive.
#[derive(Debug)]
pub struct Navigator {
    question_ids: Vec<Uuid>,
    current: usize,
    /// When the current question was put on screen.
    shown_at: Instant,
    elapsed: HashMap<Uuid, Duration>,
    answered: HashSet<Uuid>,
}

impl Navigator {
    pub fn new(question_ids: Vec<Uuid>, answered: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            question_ids,
            current: 0,
            shown_at: Instant::now(),
            elapsed: HashMap::new(),
            answered: answered.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> Option<Uuid> {
        self.question_ids.get(self.current).copied()
    }

    /// Moves to `index`. Out-of-range requests leave the position untouched
    /// and return `false`.
    pub fn go_to(&mut self, index: usize) -> bool {
        self.go_to_at(index, Instant::now())
    }

    pub fn next(&mut self) -> bool {
        self.go_to(self.current.saturating_add(1))
    }

    pub fn previous(&mut self) -> bool {
        match self.current.checked_sub(1) {
            Some(index) => self.go_to(index),
            None => false,
        }
    }

    /// Total whole seconds spent on the current question across visits.
    pub fn time_on_current(&mut self) -> u64 {
        self.time_on_current_at(Instant::now())
    }

    pub fn mark_answered(&mut self, question_id: Uuid, answered: bool) {
        if answered {
            self.answered.insert(question_id);
        } else {
            self.answered.remove(&question_id);
        }
    }

    pub fn answered_count(&self) -> usize {
        self.answered.len()
    }

    fn go_to_at(&mut self, index: usize, now: Instant) -> bool {
        if index >= self.question_ids.len() {
            tracing::debug!(index, len = self.question_ids.len(), "Ignoring out-of-range navigation");
            return false;
        }
        if index != self.current {
            self.bank(now);
            self.current = index;
        }
        true
    }

    fn time_on_current_at(&mut self, now: Instant) -> u64 {
        self.bank(now);
        self.current_question()
            .and_then(|id| self.elapsed.get(&id))
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Adds the time since `shown_at` to the current question and restarts the clock.
    fn bank(&mut self, now: Instant) {
        if let Some(id) = self.current_question() {
            let spent = now.saturating_duration_since(self.shown_at);
            *self.elapsed.entry(id).or_default() += spent;
        }
        self.shown_at = now;
    }
}
