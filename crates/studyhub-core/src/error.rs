//! Quiz error types.
//!
//! These errors cover bank loading, answer validation, and local storage.
//! Each variant maps to the next step the user is offered, so the rendering
//! layer never has to show a dead end.

use thiserror::Error;

/// Errors that can occur while loading banks, running a quiz, or persisting progress.
#[derive(Debug, Error)]
pub enum QuizError {
    /// The bank contained no usable questions.
    #[error("question bank is empty")]
    EmptyBank,

    /// A question object is missing required fields.
    #[error("malformed question at index {index}: {reason}")]
    MalformedQuestion { index: usize, reason: String },

    /// The bank JSON does not have a recognized shape.
    #[error("unrecognized question bank format: {0}")]
    DataFormat(String),

    /// The submitted answer does not fit the question type.
    #[error("answer does not fit the question: {0}")]
    Validation(String),

    /// A persistence read or write failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A bank or asset fetch failed.
    #[error("network error: {0}")]
    Network(String),

    /// The run has no current question (it is complete or empty).
    #[error("no active question in this run")]
    NoActiveQuestion,
}

/// What the user can do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Retry the failed load.
    Retry,
    /// Leave the quiz and go back to the landing page.
    ReturnHome,
    /// Nothing was lost that blocks the run; keep going.
    Continue,
}

impl QuizError {
    /// Returns the actionable next step for this error.
    pub fn recovery(&self) -> Recovery {
        match self {
            QuizError::MalformedQuestion { .. }
            | QuizError::DataFormat(_)
            | QuizError::Network(_) => Recovery::Retry,
            QuizError::EmptyBank | QuizError::NoActiveQuestion => Recovery::ReturnHome,
            QuizError::Validation(_) | QuizError::Storage(_) => Recovery::Continue,
        }
    }

    /// Returns `true` if the error must be surfaced as a blocking screen.
    pub fn is_blocking(&self) -> bool {
        !matches!(self.recovery(), Recovery::Continue)
    }
}
