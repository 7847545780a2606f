//! Job repository error types.

use reframe_models::{JobStatus, TransitionError};
use thiserror::Error;

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Stale transition: expected stage {expected}, job is at stage {actual}")]
    StaleTransition { expected: usize, actual: usize },

    #[error("Job is already {0}")]
    Terminal(JobStatus),

    #[error("Dedupe key {0} is bound to a different payload")]
    DedupeConflict(String),

    /// Concurrent writers kept winning the version race.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RepoError {
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound(id.to_string())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepoError::Conflict(_) => true,
            RepoError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            _ => false,
        }
    }

    /// True for rejected state-machine transitions.
    pub fn is_transition_rejected(&self) -> bool {
        matches!(self, RepoError::StaleTransition { .. } | RepoError::Terminal(_))
    }
}

impl From<TransitionError> for RepoError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::StaleTransition { expected, actual } => {
                RepoError::StaleTransition { expected, actual }
            }
            TransitionError::Terminal(status) => RepoError::Terminal(status),
        }
    }
}
