//! Stage failure taxonomy.
//!
//! Every collaborator error is mapped to one of four kinds here, so the
//! dispatcher can decide between retrying, failing and cancelling without
//! inspecting error sources.

use reframe_jobs::RepoError;
use reframe_media::MediaError;
use reframe_models::{ErrorKind, OptionsError};
use reframe_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    /// Bad input or config, never retried
    #[error("invalid input: {0}")]
    Validation(String),

    /// I/O hiccup or engine timeout, retried with backoff
    #[error("transient failure: {0}")]
    Transient(String),

    /// The engine rejected the media
    #[error("{0}")]
    Permanent(String),

    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Validation(_) => ErrorKind::Validation,
            StageError::Transient(_) => ErrorKind::Transient,
            StageError::Permanent(_) => ErrorKind::Permanent,
            StageError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }
}

impl From<MediaError> for StageError {
    fn from(e: MediaError) -> Self {
        if e.is_transient() {
            return StageError::Transient(e.to_string());
        }
        match e {
            MediaError::FileNotFound(_)
            | MediaError::UnsupportedFormat(_)
            | MediaError::InvalidSubtitle(_) => StageError::Validation(e.to_string()),
            MediaError::FfmpegFailed {
                ref message,
                ref stderr,
                ..
            } => {
                let detail = stderr
                    .as_deref()
                    .and_then(|s| s.lines().rev().find(|l| !l.trim().is_empty()))
                    .map(|l| format!("{message}: {}", l.trim()))
                    .unwrap_or_else(|| message.clone());
                StageError::Permanent(detail)
            }
            other => StageError::Permanent(other.to_string()),
        }
    }
}

impl From<StorageError> for StageError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
                StageError::Validation(e.to_string())
            }
            e if e.is_retryable() => StageError::Transient(e.to_string()),
            e => StageError::Permanent(e.to_string()),
        }
    }
}

impl From<RepoError> for StageError {
    fn from(e: RepoError) -> Self {
        if e.is_retryable() {
            StageError::Transient(e.to_string())
        } else {
            StageError::Permanent(e.to_string())
        }
    }
}

impl From<OptionsError> for StageError {
    fn from(e: OptionsError) -> Self {
        StageError::Validation(e.to_string())
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        MediaError::Io(e).into()
    }
}

impl From<serde_json::Error> for StageError {
    fn from(e: serde_json::Error) -> Self {
        StageError::Validation(format!("malformed JSON asset: {e}"))
    }
}

impl From<tokio::task::JoinError> for StageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StageError::Permanent(format!("stage task failed: {e}"))
    }
}
