//! Local study progress: attempt counts, daily activity, category scores,
//! and the resumable run.
//!
//! Everything lives under a versioned key prefix in a [`KvStore`]. Reads are
//! lenient and writes are best-effort: a failed write is logged and dropped,
//! never surfaced to the quiz.

use std::collections::{BTreeMap, VecDeque};

use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::RunState;
use crate::store::KvStore;

const ATTEMPTS_KEY: &str = "attemptsByQuestion";
const DAILY_KEY: &str = "dailyAnsweredCounts";
const CATEGORY_KEY: &str = "categoryPerformance";
const RUN_KEY: &str = "runState";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Key layout and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_retention_days")]
    pub daily_retention_days: u32,
    #[serde(default = "default_category_cap")]
    pub category_history_cap: usize,
}

fn default_key_prefix() -> String {
    "sg:v1:".to_string()
}
fn default_retention_days() -> u32 {
    21
}
fn default_category_cap() -> usize {
    20
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            daily_retention_days: default_retention_days(),
            category_history_cap: default_category_cap(),
        }
    }
}

/// Progress tracker over any [`KvStore`].
pub struct ProgressStore<S: KvStore> {
    store: S,
    config: ProgressConfig,
}

impl<S: KvStore> ProgressStore<S> {
    pub fn new(store: S, config: ProgressConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.config
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.config.key_prefix, name)
    }

    fn read_object(&self, name: &str) -> serde_json::Map<String, Value> {
        let Some(raw) = self.store.get(&self.key(name)) else {
            return serde_json::Map::new();
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!("discarding unreadable progress entry {name}");
                serde_json::Map::new()
            }
        }
    }

    fn read_counts(&self, name: &str) -> BTreeMap<String, u64> {
        self.read_object(name)
            .into_iter()
            .filter_map(|(key, value)| match value.as_u64() {
                Some(n) => Some((key, n)),
                None => {
                    tracing::warn!("dropping invalid count for {key} in {name}: {value}");
                    None
                }
            })
            .collect()
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("failed to encode progress entry {name}: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key(name), &json) {
            tracing::error!("progress write to {name} discarded: {e}");
        }
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = self.store.get(&self.key(name))?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("discarding unreadable progress entry {name}: {e}");
                None
            }
        }
    }

    fn remove(&self, name: &str) {
        if let Err(e) = self.store.remove(&self.key(name)) {
            tracing::error!("failed to remove progress entry {name}: {e}");
        }
    }

    // -- attempts and daily activity ------------------------------------

    /// Count one answered question for today.
    pub fn record_answered(&self, question_id: &str) {
        self.record_answered_on(question_id, Local::now().date_naive());
    }

    pub fn record_answered_on(&self, question_id: &str, date: NaiveDate) {
        if question_id.trim().is_empty() {
            tracing::warn!("record_answered called without a question id");
            return;
        }

        let mut attempts = self.read_counts(ATTEMPTS_KEY);
        *attempts.entry(question_id.to_string()).or_insert(0) += 1;
        self.write(ATTEMPTS_KEY, &attempts);

        let mut daily = self.read_counts(DAILY_KEY);
        *daily.entry(date.format(DATE_FORMAT).to_string()).or_insert(0) += 1;
        self.prune_daily(&mut daily, date);
        self.write(DAILY_KEY, &daily);
    }

    fn prune_daily(&self, daily: &mut BTreeMap<String, u64>, today: NaiveDate) {
        let cutoff = today - Duration::days(i64::from(self.config.daily_retention_days));
        daily.retain(|key, _| {
            NaiveDate::parse_from_str(key, DATE_FORMAT).is_ok_and(|d| d >= cutoff)
        });
    }

    fn daily_counts(&self) -> BTreeMap<NaiveDate, u64> {
        self.read_counts(DAILY_KEY)
            .into_iter()
            .filter_map(|(key, n)| {
                NaiveDate::parse_from_str(&key, DATE_FORMAT)
                    .ok()
                    .map(|d| (d, n))
            })
            .collect()
    }

    pub fn attempts(&self, question_id: &str) -> u64 {
        self.read_counts(ATTEMPTS_KEY)
            .get(question_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn attempts_map(&self) -> BTreeMap<String, u64> {
        self.read_counts(ATTEMPTS_KEY)
    }

    pub fn answered_today(&self) -> u64 {
        self.answered_on(Local::now().date_naive())
    }

    pub fn answered_on(&self, date: NaiveDate) -> u64 {
        self.daily_counts().get(&date).copied().unwrap_or(0)
    }

    /// Answers since Monday of the current week.
    pub fn answered_this_week(&self) -> u64 {
        self.answered_in_week_of(Local::now().date_naive())
    }

    pub fn answered_in_week_of(&self, date: NaiveDate) -> u64 {
        let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        self.daily_counts()
            .range(monday..=date)
            .map(|(_, n)| n)
            .sum()
    }

    /// The last `days` days ending today, oldest first, zero-filled.
    pub fn daily_history(&self, days: u32) -> Vec<(NaiveDate, u64)> {
        self.daily_history_until(Local::now().date_naive(), days)
    }

    pub fn daily_history_until(&self, end: NaiveDate, days: u32) -> Vec<(NaiveDate, u64)> {
        let counts = self.daily_counts();
        (0..i64::from(days))
            .rev()
            .map(|back| {
                let day = end - Duration::days(back);
                (day, counts.get(&day).copied().unwrap_or(0))
            })
            .collect()
    }

    // -- category performance -------------------------------------------

    /// Append a percentage score, evicting the oldest past the cap.
    pub fn record_category_score(&self, category: &str, score: u32) {
        let mut all = self.category_map();
        let scores = all.entry(category.to_string()).or_default();
        scores.push_back(score);
        while scores.len() > self.config.category_history_cap {
            scores.pop_front();
        }
        self.write(CATEGORY_KEY, &all);
    }

    pub fn category_scores(&self, category: &str) -> Vec<u32> {
        self.category_map()
            .remove(category)
            .map(Vec::from)
            .unwrap_or_default()
    }

    fn category_map(&self) -> BTreeMap<String, VecDeque<u32>> {
        self.read_object(CATEGORY_KEY)
            .into_iter()
            .filter_map(|(category, value)| {
                let Value::Array(items) = value else {
                    tracing::warn!("dropping invalid score list for {category}");
                    return None;
                };
                let scores = items
                    .iter()
                    .filter_map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
                    .collect();
                Some((category, scores))
            })
            .collect()
    }

    // -- resumable run ----------------------------------------------------

    /// Persist `state` if it is a run worth resuming; otherwise drop any saved one.
    pub fn save_run(&self, state: &RunState) {
        if state.can_resume() {
            self.write(RUN_KEY, state);
        } else {
            self.clear_run();
        }
    }

    pub fn load_resumable_run(&self) -> Option<RunState> {
        let state: RunState = self.read(RUN_KEY)?;
        if let Err(reason) = state.validate() {
            tracing::warn!("discarding inconsistent saved run: {reason}");
            self.clear_run();
            return None;
        }
        if state.can_resume() {
            Some(state)
        } else {
            self.clear_run();
            None
        }
    }

    pub fn clear_run(&self) {
        self.remove(RUN_KEY);
    }

    /// Remove every key this store owns.
    pub fn clear_all(&self) {
        for name in [ATTEMPTS_KEY, DAILY_KEY, CATEGORY_KEY, RUN_KEY] {
            self.remove(name);
        }
    }
}
