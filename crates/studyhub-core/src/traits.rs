//! Core trait definitions for bank sources and the rendering adapter.
//!
//! `BankSource` is implemented here for local files and by
//! `studyhub-offline` for cache-backed HTTP fetches. `RunObserver` is the
//! only seam through which presentation code sees run state.

use async_trait::async_trait;

use crate::engine::{RunSnapshot, RunSummary, SubmitOutcome};
use crate::error::QuizError;
use crate::model::QuestionBank;

// ---------------------------------------------------------------------------
// Bank source trait
// ---------------------------------------------------------------------------

/// Anything that can produce a normalized question bank for a module name.
#[async_trait]
pub trait BankSource: Send + Sync {
    /// Load and normalize the bank for `module`.
    async fn load_bank(&self, module: &str) -> Result<QuestionBank, QuizError>;
}

// ---------------------------------------------------------------------------
// Rendering adapter
// ---------------------------------------------------------------------------

/// Receives immutable snapshots of a run as it progresses.
pub trait RunObserver: Send + Sync {
    fn on_question(&self, snapshot: &RunSnapshot);
    fn on_answer(&self, outcome: &SubmitOutcome, snapshot: &RunSnapshot);
    fn on_complete(&self, summary: &RunSummary);
    fn on_error(&self, error: &QuizError);
}

/// No-op observer.
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn on_question(&self, _: &RunSnapshot) {}
    fn on_answer(&self, _: &SubmitOutcome, _: &RunSnapshot) {}
    fn on_complete(&self, _: &RunSummary) {}
    fn on_error(&self, _: &QuizError) {}
}
