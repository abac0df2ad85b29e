//! Synchronizer error types.

use studyhub_core::error::QuizError;
use thiserror::Error;

use crate::worker::WorkerState;

/// Errors from fetching, caching, and the worker lifecycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request never produced a response (offline, DNS, timeout).
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// A response arrived with a status the caller cannot use.
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// A response body could not be decoded.
    #[error("invalid document at {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid worker transition from {from} to {to}")]
    InvalidTransition { from: WorkerState, to: WorkerState },

    /// No cache generation is active yet.
    #[error("no active cache generation")]
    NotActive,

    #[error("install of {version} failed: {reason}")]
    Install { version: String, reason: String },

    /// The other end of a page/worker channel has gone away.
    #[error("message channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Returns `true` if the failure is a connectivity problem rather than a
    /// lifecycle or protocol error.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }
}

impl From<SyncError> for QuizError {
    fn from(e: SyncError) -> Self {
        QuizError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyhub_core::error::Recovery;

    #[test]
    fn network_errors_are_retryable_quiz_errors() {
        let err = SyncError::Network {
            url: "/modules/Renal.json".into(),
            message: "connection refused".into(),
        };
        assert!(err.is_offline());
        let quiz: QuizError = err.into();
        assert_eq!(quiz.recovery(), Recovery::Retry);
        assert!(quiz.to_string().contains("/modules/Renal.json"));
    }

    #[test]
    fn transition_message_names_states() {
        let err = SyncError::InvalidTransition {
            from: WorkerState::Redundant,
            to: WorkerState::Active,
        };
        assert_eq!(err.to_string(), "invalid worker transition from redundant to active");
        assert!(!err.is_offline());
    }
}
