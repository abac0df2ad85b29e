//! Answer validation for every question type.
//!
//! Choice questions are exact set comparisons. Fill-blank answers go through
//! a chain of increasingly lenient comparisons, mostly aimed at lab-value
//! ranges typed in whatever format the student prefers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::QuizError;
use crate::model::{Question, QuestionType, UserAnswer};

/// Result of checking one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCheck {
    pub is_correct: bool,
    /// Pass/fail per blank, in blank order. Empty for choice questions.
    pub per_blank: Vec<bool>,
}

/// Accepted alternatives keyed by the expected answer.
///
/// Rows are one-directional: an expected "low" accepts "decreased", but an
/// expected "decreased" only accepts what its own row lists.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("low", &["decreased", "decrease", "↓", "below normal"]),
    ("high", &["increased", "increase", "↑", "elevated", "above normal"]),
    ("decreased", &["low", "↓"]),
    ("increased", &["high", "↑", "elevated"]),
    ("negative", &["neg", "(-)", "none"]),
    ("positive", &["pos", "(+)", "+"]),
    ("normal", &["wnl", "within normal limits", "norm"]),
];

/// Characters that students (and word processors) use in place of `-`.
const MINUS_VARIANTS: &[char] = &[
    '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}', '\u{FE63}', '\u{FF0D}',
];

/// Check a submission against a question.
///
/// Returns [`QuizError::Validation`] when the answer shape does not fit the
/// question type; callers treat that as "unanswered".
pub fn check_answer(question: &Question, answer: &UserAnswer) -> Result<AnswerCheck, QuizError> {
    match (question.question_type, answer) {
        (QuestionType::FillBlank, UserAnswer::Blanks(blanks)) => check_blanks(question, blanks),
        (QuestionType::FillBlank, UserAnswer::Choices(_)) => Err(QuizError::Validation(
            "fill-blank question answered with option choices".into(),
        )),
        (_, UserAnswer::Blanks(_)) => Err(QuizError::Validation(format!(
            "{} question answered with text blanks",
            question.question_type
        ))),
        (kind, UserAnswer::Choices(chosen)) => {
            let chosen = validate_choices(question, chosen)?;
            let is_correct = match kind {
                QuestionType::MultiSelect => chosen == question.correct,
                _ => chosen.len() == 1 && chosen.iter().all(|i| question.correct.contains(i)),
            };
            Ok(AnswerCheck {
                is_correct,
                per_blank: vec![],
            })
        }
    }
}

fn validate_choices(question: &Question, chosen: &[usize]) -> Result<BTreeSet<usize>, QuizError> {
    if chosen.is_empty() {
        return Err(QuizError::Validation("no option selected".into()));
    }
    if let Some(bad) = chosen.iter().find(|&&i| i >= question.options.len()) {
        return Err(QuizError::Validation(format!(
            "option {bad} does not exist ({} options)",
            question.options.len()
        )));
    }
    Ok(chosen.iter().copied().collect())
}

fn check_blanks(question: &Question, blanks: &[String]) -> Result<AnswerCheck, QuizError> {
    if blanks.len() != question.blank_answers.len() {
        return Err(QuizError::Validation(format!(
            "expected {} blank(s), got {}",
            question.blank_answers.len(),
            blanks.len()
        )));
    }
    if let Some(i) = blanks.iter().position(|b| b.trim().is_empty()) {
        return Err(QuizError::Validation(format!("blank {} is empty", i + 1)));
    }

    let per_blank: Vec<bool> = blanks
        .iter()
        .zip(&question.blank_answers)
        .map(|(user, expected)| blank_matches(user, expected))
        .collect();

    Ok(AnswerCheck {
        is_correct: per_blank.iter().all(|ok| *ok),
        per_blank,
    })
}

/// Lowercase, trim, collapse internal whitespace, and fold dash variants to `-`.
pub fn normalize_text(s: &str) -> String {
    let folded: String = s
        .chars()
        .map(|c| if MINUS_VARIANTS.contains(&c) { '-' } else { c })
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep only the characters meaningful in a numeric range: digits, `.`, `%`, `-`.
pub fn range_form(normalized: &str) -> String {
    normalized
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '%' | '-'))
        .collect()
}

/// Compare one typed blank against its expected answer.
pub fn blank_matches(user: &str, expected: &str) -> bool {
    let user = normalize_text(user);
    let expected = normalize_text(expected);

    if user == expected {
        return true;
    }

    if let (Ok(a), Ok(b)) = (user.parse::<f64>(), expected.parse::<f64>()) {
        if a.is_finite() && b.is_finite() && a == b {
            return true;
        }
    }

    let user_range = range_form(&user);
    let expected_range = range_form(&expected);
    if !user_range.is_empty() && !expected_range.is_empty() {
        if user_range == expected_range {
            return true;
        }
        // "135145" still earns credit for "135-145".
        let expected_head = first_segment(&expected_range);
        let user_head = first_segment(&user_range);
        if expected_head.is_some_and(|h| user_range.contains(h))
            || user_head.is_some_and(|h| expected_range.contains(h))
        {
            return true;
        }
    }

    SYNONYMS
        .iter()
        .find(|(key, _)| *key == expected)
        .is_some_and(|(_, accepted)| accepted.contains(&user.as_str()))
}

fn first_segment(range: &str) -> Option<&str> {
    range
        .split('-')
        .next()
        .filter(|seg| seg.chars().any(|c| c.is_ascii_digit()))
}
