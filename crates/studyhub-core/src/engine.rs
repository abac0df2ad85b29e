//! Remediation quiz engine.
//!
//! A run samples a pool of questions and walks an ordered queue over it.
//! Missed questions are spliced back in shortly after they are missed, and
//! anything still unmastered at the end of the queue gets a second pass, so
//! a run only finishes once every pool question has been answered correctly
//! at least once.
//!
//! All functions here are pure state transitions over [`RunState`]; the
//! controller wires them to persistence and rendering.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QuizError;
use crate::matching::check_answer;
use crate::model::{Question, QuestionBank, RequestedCount, UserAnswer};

/// Tuning for the re-injection heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fraction of the pool that must be missed before re-injection, for
    /// full-bank or large runs.
    #[serde(default = "default_full_bank_fraction")]
    pub full_bank_fraction: f64,
    /// Same, for short runs.
    #[serde(default = "default_partial_fraction")]
    pub partial_fraction: f64,
    /// Requests of at least this many questions count as large.
    #[serde(default = "default_large_request_threshold")]
    pub large_request_threshold: usize,
}

fn default_full_bank_fraction() -> f64 {
    0.05
}

fn default_partial_fraction() -> f64 {
    0.15
}

fn default_large_request_threshold() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            full_bank_fraction: default_full_bank_fraction(),
            partial_fraction: default_partial_fraction(),
            large_request_threshold: default_large_request_threshold(),
        }
    }
}

impl EngineConfig {
    /// `max(1, ceil(pool_size * fraction))`.
    pub fn threshold_for(&self, pool_size: usize, large: bool) -> usize {
        let fraction = if large {
            self.full_bank_fraction
        } else {
            self.partial_fraction
        };
        ((pool_size as f64 * fraction).ceil() as usize).max(1)
    }
}

/// Per-question answer history within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Correctness of the very first submission. Never changes afterwards.
    pub first_try_correct: bool,
    /// Correctness of the latest submission.
    pub correct: bool,
    pub last_user_answer: UserAnswer,
    pub attempts: u32,
}

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub question_id: String,
    pub is_correct: bool,
    pub per_blank: Vec<bool>,
    /// `true` if this was the first submission for the question in this run.
    pub first_attempt: bool,
    /// Question ids spliced back into the queue by this submission.
    pub injected: Vec<String>,
    pub correct_answer: String,
    pub rationale: String,
}

/// One quiz attempt.
///
/// `order` holds indices into `master_pool`, so every queue entry is a pool
/// member by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    id: Uuid,
    module: String,
    started_at: DateTime<Utc>,
    master_pool: Vec<Question>,
    order: Vec<usize>,
    position: usize,
    answered: HashMap<String, AnswerRecord>,
    wrong_since_last_injection: Vec<usize>,
    threshold_wrong: usize,
    total_answered: u32,
    is_full_bank: bool,
    is_retry: bool,
    /// Outcome of the submission at the current position, cleared on advance.
    #[serde(default)]
    pending: Option<SubmitOutcome>,
}

/// Read-only view handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub module: String,
    pub question: Option<Question>,
    pub position: usize,
    pub queue_length: usize,
    pub pool_size: usize,
    pub mastered: usize,
    pub remaining_to_master: usize,
    pub total_answered: u32,
    pub awaiting_advance: bool,
}

impl RunSnapshot {
    /// Percentage of the pool mastered so far, 0 for an empty pool.
    pub fn mastery_percentage(&self) -> u32 {
        if self.pool_size == 0 {
            return 0;
        }
        (self.mastered * 100 / self.pool_size) as u32
    }
}

impl RunState {
    fn new(module: &str, pool: Vec<Question>, threshold_wrong: usize, is_full_bank: bool, is_retry: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            module: module.to_string(),
            started_at: Utc::now(),
            order: (0..pool.len()).collect(),
            master_pool: pool,
            position: 0,
            answered: HashMap::new(),
            wrong_since_last_injection: Vec::new(),
            threshold_wrong,
            total_answered: 0,
            is_full_bank,
            is_retry,
            pending: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// The fixed set of questions that must all be mastered.
    pub fn master_pool(&self) -> &[Question] {
        &self.master_pool
    }

    /// Question ids in queue order, repeats included.
    pub fn order_ids(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|&i| self.master_pool.get(i))
            .map(|q| q.id.as_str())
            .collect()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn threshold_wrong(&self) -> usize {
        self.threshold_wrong
    }

    pub fn total_answered(&self) -> u32 {
        self.total_answered
    }

    pub fn is_full_bank(&self) -> bool {
        self.is_full_bank
    }

    pub fn is_retry(&self) -> bool {
        self.is_retry
    }

    pub fn answer_record(&self, question_id: &str) -> Option<&AnswerRecord> {
        self.answered.get(question_id)
    }

    /// The question under the cursor, if the run is not finished.
    pub fn current(&self) -> Option<&Question> {
        self.order
            .get(self.position)
            .and_then(|&i| self.master_pool.get(i))
    }

    /// Check that every stored index points into the pool. Runs read back
    /// from storage go through this before use.
    pub fn validate(&self) -> Result<(), String> {
        let pool = self.master_pool.len();
        if let Some(i) = self
            .order
            .iter()
            .chain(&self.wrong_since_last_injection)
            .find(|&&i| i >= pool)
        {
            return Err(format!("queue index {i} outside pool of {pool}"));
        }
        if self.position > self.order.len() {
            return Err(format!(
                "position {} past queue of {}",
                self.position,
                self.order.len()
            ));
        }
        if self.threshold_wrong == 0 {
            return Err("threshold of zero".into());
        }
        let ids: HashSet<&str> = self.master_pool.iter().map(|q| q.id.as_str()).collect();
        if let Some(id) = self.answered.keys().find(|id| !ids.contains(id.as_str())) {
            return Err(format!("answer recorded for unknown question {id}"));
        }
        Ok(())
    }

    fn is_mastered(&self, question: &Question) -> bool {
        self.answered.get(&question.id).is_some_and(|r| r.correct)
    }

    /// Pool indices not yet answered correctly, in pool order.
    fn not_mastered(&self) -> Vec<usize> {
        (0..self.master_pool.len())
            .filter(|&i| !self.is_mastered(&self.master_pool[i]))
            .collect()
    }

    pub fn remaining_to_master(&self) -> usize {
        self.not_mastered().len()
    }

    /// `true` once the cursor has run off the queue with everything mastered.
    pub fn is_complete(&self) -> bool {
        self.current().is_none() && self.remaining_to_master() == 0
    }

    /// Only unfinished full-bank runs are worth offering for resume.
    pub fn can_resume(&self) -> bool {
        self.is_full_bank && !self.is_retry && !self.is_complete()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let remaining = self.remaining_to_master();
        RunSnapshot {
            run_id: self.id,
            module: self.module.clone(),
            question: self.current().cloned(),
            position: self.position,
            queue_length: self.order.len(),
            pool_size: self.master_pool.len(),
            mastered: self.master_pool.len() - remaining,
            remaining_to_master: remaining,
            total_answered: self.total_answered,
            awaiting_advance: self.pending.is_some(),
        }
    }
}

/// Start a run by sampling `requested` questions from `bank`.
///
/// Sampling is a uniform Fisher–Yates shuffle without replacement. Asking for
/// at least the bank size (or [`RequestedCount::All`]) uses the whole bank.
pub fn start_run<R: Rng + ?Sized>(
    bank: &QuestionBank,
    requested: RequestedCount,
    config: &EngineConfig,
    rng: &mut R,
) -> Result<RunState, QuizError> {
    if bank.is_empty() {
        return Err(QuizError::EmptyBank);
    }

    let len = bank.len();
    let (full, large) = match requested {
        RequestedCount::All => (true, true),
        RequestedCount::Count(n) => (n >= len, n >= config.large_request_threshold),
    };

    let mut pool = bank.questions.clone();
    if full {
        pool.shuffle(rng);
    } else {
        let k = match requested {
            RequestedCount::Count(n) => n,
            RequestedCount::All => len,
        };
        for i in 0..k {
            let j = rng.gen_range(i..len);
            pool.swap(i, j);
        }
        pool.truncate(k);
    }
    dedupe_by_id(&mut pool, &bank.module);

    let threshold = config.threshold_for(pool.len(), full || large);
    tracing::debug!(
        "starting run on {} with {} of {} questions (threshold {threshold})",
        bank.module,
        pool.len(),
        len
    );

    Ok(RunState::new(&bank.module, pool, threshold, full, false))
}

/// Start a retry run over the questions missed on first try in `summary`.
pub fn retry_missed<R: Rng + ?Sized>(
    summary: &RunSummary,
    config: &EngineConfig,
    rng: &mut R,
) -> Result<RunState, QuizError> {
    if summary.missed_questions.is_empty() {
        return Err(QuizError::EmptyBank);
    }
    let mut pool = summary.missed_questions.clone();
    pool.shuffle(rng);
    let threshold = config.threshold_for(pool.len(), false);
    Ok(RunState::new(&summary.module, pool, threshold, false, true))
}

fn dedupe_by_id(pool: &mut Vec<Question>, module: &str) {
    let mut seen = HashSet::new();
    pool.retain(|q| {
        let fresh = seen.insert(q.id.clone());
        if !fresh {
            tracing::warn!("duplicate question id {} in {module}, keeping the first", q.id);
        }
        fresh
    });
}

/// Validate and record an answer for the current question.
///
/// Validation happens before anything is mutated, so an error leaves the run
/// exactly as it was. Submitting again at the same position without
/// advancing returns the first outcome unchanged.
pub fn submit_answer(state: &mut RunState, answer: &UserAnswer) -> Result<SubmitOutcome, QuizError> {
    if let Some(previous) = &state.pending {
        tracing::debug!("ignoring repeated submission for {}", previous.question_id);
        return Ok(previous.clone());
    }

    let pool_index = *state
        .order
        .get(state.position)
        .ok_or(QuizError::NoActiveQuestion)?;
    let question = state
        .master_pool
        .get(pool_index)
        .ok_or(QuizError::NoActiveQuestion)?;
    let check = check_answer(question, answer)?;

    let question_id = question.id.clone();
    let correct_answer = question.display_answer();
    let rationale = question.rationale.clone();

    let first_attempt = !state.answered.contains_key(&question_id);
    let record = state
        .answered
        .entry(question_id.clone())
        .or_insert_with(|| AnswerRecord {
            first_try_correct: check.is_correct,
            correct: false,
            last_user_answer: answer.clone(),
            attempts: 0,
        });
    record.correct = check.is_correct;
    record.last_user_answer = answer.clone();
    record.attempts += 1;
    state.total_answered += 1;

    let mut injected = Vec::new();
    if !check.is_correct {
        state.wrong_since_last_injection.push(pool_index);
        if state.wrong_since_last_injection.len() >= state.threshold_wrong {
            injected = inject_missed(state);
        }
    }

    tracing::debug!(
        "answer for {question_id}: correct={} first_attempt={first_attempt} injected={}",
        check.is_correct,
        injected.len()
    );

    let outcome = SubmitOutcome {
        question_id,
        is_correct: check.is_correct,
        per_blank: check.per_blank,
        first_attempt,
        injected,
        correct_answer,
        rationale,
    };
    state.pending = Some(outcome.clone());
    Ok(outcome)
}

/// Splice the deduplicated wrong buffer in right after the cursor.
fn inject_missed(state: &mut RunState) -> Vec<String> {
    let buffer = std::mem::take(&mut state.wrong_since_last_injection);
    let mut seen = HashSet::new();
    let unique: Vec<usize> = buffer
        .into_iter()
        .filter(|&i| {
            state
                .master_pool
                .get(i)
                .is_some_and(|q| seen.insert(q.id.clone()))
        })
        .collect();

    let at = (state.position + 1).min(state.order.len());
    state.order.splice(at..at, unique.iter().copied());

    unique
        .iter()
        .filter_map(|&i| state.master_pool.get(i))
        .map(|q| q.id.clone())
        .collect()
}

/// Move the cursor forward.
///
/// Returns `None` when the run is complete. Running off the end of the queue
/// with unmastered questions left appends them, in pool order, as a second
/// pass.
pub fn advance(state: &mut RunState) -> Option<&Question> {
    state.pending = None;
    if state.master_pool.is_empty() {
        return None;
    }

    let next = state.position + 1;
    if next < state.order.len() {
        state.position = next;
        return state.current();
    }

    let not_mastered = state.not_mastered();
    if not_mastered.is_empty() {
        state.position = state.order.len();
        return None;
    }

    tracing::debug!(
        "second pass over {} unmastered question(s) in {}",
        not_mastered.len(),
        state.module
    );
    state.wrong_since_last_injection.clear();
    state.position = state.order.len();
    state.order.extend(not_mastered);
    state.current()
}

/// One row of the end-of-run review list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub question_id: String,
    pub stem: String,
    pub correct_answer: String,
    pub rationale: String,
    /// Whether the latest submission was correct.
    pub correct: bool,
    /// How many extra times the question was queued.
    pub times_missed: u32,
}

/// End-of-run scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub module: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub first_try_correct_count: usize,
    /// Distinct questions ever answered.
    pub first_try_total: usize,
    /// Submissions including repeats.
    pub total_answered: u32,
    /// Pool members whose first submission was wrong.
    pub missed_questions: Vec<Question>,
    pub review: Vec<ReviewItem>,
    pub is_retry: bool,
}

impl RunSummary {
    /// First-try score as a rounded percentage, `None` when nothing was answered.
    pub fn first_try_percentage(&self) -> Option<u32> {
        if self.first_try_total == 0 {
            return None;
        }
        let pct = self.first_try_correct_count as f64 * 100.0 / self.first_try_total as f64;
        Some(pct.round() as u32)
    }
}

/// Finish a run and compute its summary. The state is consumed.
pub fn end_run(state: RunState) -> RunSummary {
    let first_try_correct_count = state
        .answered
        .values()
        .filter(|r| r.first_try_correct)
        .count();

    let missed_questions: Vec<Question> = state
        .master_pool
        .iter()
        .filter(|q| state.answered.get(&q.id).is_some_and(|r| !r.first_try_correct))
        .cloned()
        .collect();

    RunSummary {
        run_id: state.id,
        module: state.module.clone(),
        started_at: state.started_at,
        ended_at: Utc::now(),
        first_try_correct_count,
        first_try_total: state.answered.len(),
        total_answered: state.total_answered,
        missed_questions,
        review: build_review(&state),
        is_retry: state.is_retry,
    }
}

fn build_review(state: &RunState) -> Vec<ReviewItem> {
    let mut occurrences: HashMap<usize, u32> = HashMap::new();
    let mut first_seen = Vec::new();
    for &i in &state.order {
        let count = occurrences.entry(i).or_insert(0);
        if *count == 0 {
            first_seen.push(i);
        }
        *count += 1;
    }

    let mut items: Vec<ReviewItem> = first_seen
        .into_iter()
        .filter_map(|i| {
            let q = state.master_pool.get(i)?;
            Some(ReviewItem {
                question_id: q.id.clone(),
                stem: q.stem.clone(),
                correct_answer: q.display_answer(),
                rationale: q.rationale.clone(),
                correct: state.is_mastered(q),
                times_missed: occurrences[&i].saturating_sub(1),
            })
        })
        .collect();

    // Still-incorrect first, then most repeated.
    items.sort_by(|a, b| {
        a.correct
            .cmp(&b.correct)
            .then(b.times_missed.cmp(&a.times_missed))
    });
    items
}
