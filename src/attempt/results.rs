// src/attempt/results.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::scorer::Outcome;
use crate::models::{
    attempt::{Attempt, AttemptResponse},
    practice_test::{Choice, Question, TestDefinition},
};

/// One question of a finished attempt, joined with the caller's response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReviewItem {
    pub question_id: Uuid,
    pub position: i32,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: Choice,
    pub selected: Option<Choice>,
    pub outcome: Outcome,
    pub explanation: Option<String>,
    pub time_spent_seconds: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttemptResults {
    pub attempt: Attempt,
    pub test_title: String,
    pub passing_score: f64,
    pub passed: bool,
    pub items: Vec<ReviewItem>,
}

/// Review views over the fetched items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFilter {
    #[default]
    All,
    Correct,
    Wrong,
    Unanswered,
}

impl ReviewFilter {
    pub fn matches(self, item: &ReviewItem) -> bool {
        match self {
            ReviewFilter::All => true,
            ReviewFilter::Correct => item.outcome == Outcome::Correct,
            ReviewFilter::Wrong => item.outcome == Outcome::Wrong,
            ReviewFilter::Unanswered => item.outcome == Outcome::Unanswered,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResultsQuery {
    /// all | correct | wrong | unanswered
    #[serde(default)]
    pub filter: ReviewFilter,
}

impl AttemptResults {
    /// Joins every question of the test with its response (if any).
    /// Questions nobody answered still appear, as unanswered.
    pub fn build(
        attempt: Attempt,
        test: &TestDefinition,
        questions: &[Question],
        responses: Vec<AttemptResponse>,
    ) -> Self {
        let mut by_question: HashMap<Uuid, AttemptResponse> =
            responses.into_iter().map(|r| (r.question_id, r)).collect();

        let items = questions
            .iter()
            .map(|q| {
                let response = by_question.remove(&q.id);
                let selected = response.as_ref().and_then(|r| r.selected);
                ReviewItem {
                    question_id: q.id,
                    position: q.position,
                    prompt: q.prompt.clone(),
                    options: q.options(),
                    correct_option: q.correct_option,
                    selected,
                    outcome: Outcome::of(selected, q.correct_option),
                    explanation: q.explanation.clone(),
                    time_spent_seconds: response.map(|r| r.time_spent_seconds).unwrap_or(0),
                }
            })
            .collect();

        let passed = attempt.score.is_some_and(|s| s >= test.passing_score);

        Self {
            attempt,
            test_title: test.title.clone(),
            passing_score: test.passing_score,
            passed,
            items,
        }
    }

    /// Keeps only the items matching `filter`. No extra queries.
    pub fn filtered(mut self, filter: ReviewFilter) -> Self {
        self.items.retain(|item| filter.matches(item));
        self
    }
}
