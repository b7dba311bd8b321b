// src/attempt/scorer.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::practice_test::{Choice, Question};

/// The correct option of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerKey {
    pub question_id: Uuid,
    pub correct: Choice,
}

impl From<&Question> for AnswerKey {
    fn from(q: &Question) -> Self {
        Self {
            question_id: q.id,
            correct: q.correct_option,
        }
    }
}

/// How a single question was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Wrong,
    Unanswered,
}

impl Outcome {
    pub fn of(selected: Option<Choice>, correct: Choice) -> Self {
        match selected {
            None => Outcome::Unanswered,
            Some(choice) if choice == correct => Outcome::Correct,
            Some(_) => Outcome::Wrong,
        }
    }
}

/// Result of scoring one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub correct: i32,
    pub wrong: i32,
    pub unanswered: i32,
    pub total: i32,
    /// `100 * correct / total`, 0 for a test without questions.
    pub score: f64,
    pub outcomes: HashMap<Uuid, Outcome>,
}

/// Scores recorded selections against the answer keys.
///
/// Every key is counted exactly once, so `correct + wrong + unanswered == total`.
/// A missing selection and an explicit `None` are both unanswered; selections
/// for questions outside `keys` are ignored.
pub fn score(keys: &[AnswerKey], selections: &HashMap<Uuid, Option<Choice>>) -> Tally {
    let mut tally = Tally {
        correct: 0,
        wrong: 0,
        unanswered: 0,
        total: keys.len() as i32,
        score: 0.0,
        outcomes: HashMap::with_capacity(keys.len()),
    };

    for key in keys {
        let selected = selections.get(&key.question_id).copied().flatten();
        let outcome = Outcome::of(selected, key.correct);
        match outcome {
            Outcome::Correct => tally.correct += 1,
            Outcome::Wrong => tally.wrong += 1,
            Outcome::Unanswered => tally.unanswered += 1,
        }
        tally.outcomes.insert(key.question_id, outcome);
    }

    if tally.total > 0 {
        tally.score = 100.0 * f64::from(tally.correct) / f64::from(tally.total);
    }

    tally
}
