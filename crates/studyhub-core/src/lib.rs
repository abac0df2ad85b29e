//! studyhub-core: question banks, the remediation quiz engine, and local
//! progress tracking.
//!
//! Banks are normalized into [`model::Question`]s at load time, runs are
//! driven through [`engine`] (or the stateful [`controller::QuizController`]),
//! and progress is kept in a [`store::KvStore`] under a versioned prefix.

pub mod bank;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod matching;
pub mod model;
pub mod progress;
pub mod store;
pub mod traits;
