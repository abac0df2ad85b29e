//! Quiz controller: owns one run and connects the engine to progress
//! storage and the rendering adapter.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::engine::{self, EngineConfig, RunSnapshot, RunState, RunSummary, SubmitOutcome};
use crate::error::QuizError;
use crate::model::{QuestionBank, RequestedCount, UserAnswer};
use crate::progress::ProgressStore;
use crate::store::KvStore;
use crate::traits::{NoopObserver, RunObserver};

pub struct QuizController<S: KvStore> {
    config: EngineConfig,
    rng: StdRng,
    observer: Arc<dyn RunObserver>,
    progress: ProgressStore<S>,
    state: Option<RunState>,
}

impl<S: KvStore> QuizController<S> {
    pub fn new(config: EngineConfig, progress: ProgressStore<S>) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
            observer: Arc::new(NoopObserver),
            progress,
            state: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Fix the sampling seed, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn progress(&self) -> &ProgressStore<S> {
        &self.progress
    }

    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    pub fn snapshot(&self) -> Option<RunSnapshot> {
        self.state.as_ref().map(RunState::snapshot)
    }

    fn fail<T>(&self, error: QuizError) -> Result<T, QuizError> {
        self.observer.on_error(&error);
        Err(error)
    }

    fn begin(&mut self, state: RunState) -> RunSnapshot {
        self.progress.save_run(&state);
        let snapshot = state.snapshot();
        self.state = Some(state);
        if snapshot.question.is_some() {
            self.observer.on_question(&snapshot);
        }
        snapshot
    }

    /// Start a new run, replacing any run in progress.
    pub fn start(&mut self, bank: &QuestionBank, requested: RequestedCount) -> Result<RunSnapshot, QuizError> {
        match engine::start_run(bank, requested, &self.config, &mut self.rng) {
            Ok(state) => {
                tracing::info!(
                    "started {} run on {} ({} questions)",
                    requested,
                    bank.module,
                    state.master_pool().len()
                );
                Ok(self.begin(state))
            }
            Err(e) => self.fail(e),
        }
    }

    /// Pick up a saved full-bank run, if there is one.
    pub fn resume(&mut self) -> Option<RunSnapshot> {
        let state = self.progress.load_resumable_run()?;
        tracing::info!("resuming run {} on {}", state.id(), state.module());
        Some(self.begin(state))
    }

    /// Start a retry run over the questions missed in `summary`.
    pub fn retry(&mut self, summary: &RunSummary) -> Result<RunSnapshot, QuizError> {
        match engine::retry_missed(summary, &self.config, &mut self.rng) {
            Ok(state) => Ok(self.begin(state)),
            Err(e) => self.fail(e),
        }
    }

    pub fn submit(&mut self, answer: &UserAnswer) -> Result<SubmitOutcome, QuizError> {
        let Some(state) = self.state.as_mut() else {
            return self.fail(QuizError::NoActiveQuestion);
        };

        let repeated = state.snapshot().awaiting_advance;
        let outcome = match engine::submit_answer(state, answer) {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(e),
        };

        if !repeated {
            self.progress.record_answered(&outcome.question_id);
        }
        let snapshot = state.snapshot();
        self.progress.save_run(state);
        self.observer.on_answer(&outcome, &snapshot);
        Ok(outcome)
    }

    /// Move to the next question. The snapshot has no question once the run
    /// is complete; call [`finish`](Self::finish) then.
    pub fn next(&mut self) -> Result<RunSnapshot, QuizError> {
        let Some(state) = self.state.as_mut() else {
            return self.fail(QuizError::NoActiveQuestion);
        };
        engine::advance(state);
        let snapshot = state.snapshot();
        self.progress.save_run(state);
        if snapshot.question.is_some() {
            self.observer.on_question(&snapshot);
        }
        Ok(snapshot)
    }

    /// End the run, record its first-try score under the module, and drop
    /// any saved copy.
    pub fn finish(&mut self) -> Result<RunSummary, QuizError> {
        let Some(state) = self.state.take() else {
            return self.fail(QuizError::NoActiveQuestion);
        };
        let summary = engine::end_run(state);
        if let Some(pct) = summary.first_try_percentage() {
            self.progress.record_category_score(&summary.module, pct);
        }
        self.progress.clear_run();
        tracing::info!(
            "finished run on {}: {}/{} first try",
            summary.module,
            summary.first_try_correct_count,
            summary.first_try_total
        );
        self.observer.on_complete(&summary);
        Ok(summary)
    }
}
