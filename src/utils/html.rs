// src/utils/html.rs

use crate::models::practice_test::{CreateQuestionRequest, NewQuestion};

/// Whitelist-based sanitisation of admin-authored text: harmless markup such
/// as <b> or <code> survives, scripts and event handlers do not.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

/// Sanitises every free-text field of a question. Callers validate the
/// request first, so exactly four options are present.
pub fn sanitize_question(req: CreateQuestionRequest) -> NewQuestion {
    let mut options = req.options.iter().map(|o| clean_html(o));
    let mut next = || options.next().unwrap_or_default();
    NewQuestion {
        prompt: clean_html(&req.prompt),
        options: [next(), next(), next(), next()],
        correct_option: req.correct_option,
        explanation: req.explanation.as_deref().map(clean_html),
    }
}
