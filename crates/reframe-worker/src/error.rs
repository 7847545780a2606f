//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failures of the dispatcher itself, as opposed to stage failures, which
/// are recorded on the job.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No executor registered for stage {0}")]
    MissingExecutor(String),

    #[error("Storage error: {0}")]
    Storage(#[from] reframe_storage::StorageError),

    #[error("Repository error: {0}")]
    Repo(#[from] reframe_jobs::RepoError),

    #[error("Queue error: {0}")]
    Queue(#[from] reframe_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether leaving the task unacknowledged for redelivery may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Repo(e) => e.is_retryable(),
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Queue(_) | WorkerError::Io(_) => true,
            WorkerError::ConfigError(_) | WorkerError::MissingExecutor(_) => false,
        }
    }
}
