//! Core data model types for studyhub.
//!
//! These are the normalized shapes every question bank is converted into at
//! load time, plus the answer and request types the engine works with.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleSelect,
    MultiSelect,
    FillBlank,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::SingleSelect => write!(f, "single_select"),
            QuestionType::MultiSelect => write!(f, "multi_select"),
            QuestionType::FillBlank => write!(f, "fill_blank"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_select" | "single" | "mcq" => Ok(QuestionType::SingleSelect),
            "multi_select" | "multi" | "sata" => Ok(QuestionType::MultiSelect),
            "fill_blank" | "fill_in_the_blank" | "fill" => Ok(QuestionType::FillBlank),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// One selectable option of a choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub text: String,
    pub is_correct: bool,
}

/// A normalized question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Stable identifier, used as the key for cross-session attempt tracking.
    pub id: String,
    /// The question text.
    pub stem: String,
    /// Options in display order (empty for fill-blank questions).
    #[serde(default)]
    pub options: Vec<AnswerOption>,
    /// Zero-based indices of the correct options.
    #[serde(default)]
    pub correct: BTreeSet<usize>,
    #[serde(default)]
    pub rationale: String,
    pub question_type: QuestionType,
    /// Expected answer per blank (fill-blank only).
    #[serde(default)]
    pub blank_answers: Vec<String>,
    /// Category used for per-category score history.
    #[serde(default)]
    pub category: Option<String>,
}

impl Question {
    /// Correct options as letters (`A`, `B`, ...).
    pub fn correct_letters(&self) -> Vec<char> {
        self.correct
            .iter()
            .filter_map(|&i| u8::try_from(i).ok())
            .filter(|i| *i < 26)
            .map(|i| char::from(b'A' + i))
            .collect()
    }

    /// Human-readable correct answer shown after submission.
    pub fn display_answer(&self) -> String {
        match self.question_type {
            QuestionType::FillBlank => self.blank_answers.join(" to "),
            _ => self
                .correct_letters()
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// What the user submitted for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UserAnswer {
    /// Chosen option indices.
    Choices(Vec<usize>),
    /// Text typed into each blank, in blank order.
    Blanks(Vec<String>),
}

/// How many questions to sample for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedCount {
    /// The whole bank.
    All,
    Count(usize),
}

impl fmt::Display for RequestedCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedCount::All => write!(f, "full"),
            RequestedCount::Count(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for RequestedCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "full" | "all" => Ok(RequestedCount::All),
            n => n
                .parse::<usize>()
                .map(RequestedCount::Count)
                .map_err(|_| format!("invalid quiz length: {n}")),
        }
    }
}

/// A loaded question bank for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    /// Module name the bank was loaded from.
    pub module: String,
    pub questions: Vec<Question>,
}

impl QuestionBank {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
