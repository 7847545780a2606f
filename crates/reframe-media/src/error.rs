//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors from ffmpeg, subtitle handling and external engines.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Engine binary not found: {0}")]
    BinaryNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine answered but refused the request (4xx, bad payload).
    #[error("{engine} rejected the request: {message}")]
    EngineRejected { engine: String, message: String },

    /// The engine could not be reached or failed on its side (5xx).
    #[error("{engine} unavailable: {message}")]
    EngineUnavailable { engine: String, message: String },

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid subtitle data: {0}")]
    InvalidSubtitle(String),

    #[error("Translator returned {actual} texts for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn rejected(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EngineRejected {
            engine: engine.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            engine: engine.into(),
            message: message.into(),
        }
    }

    pub fn invalid_subtitle(message: impl Into<String>) -> Self {
        Self::InvalidSubtitle(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the same call may succeed.
    ///
    /// A non-zero ffmpeg exit is treated as permanent: it almost always means
    /// the input is unreadable, and rerunning the same command fails the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Timeout(_) | MediaError::EngineUnavailable { .. } => true,
            MediaError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidData
            ),
            MediaError::Http(e) => match e.status() {
                Some(status) => status.is_server_error() || status.as_u16() == 429,
                None => e.is_timeout() || e.is_connect() || e.is_request(),
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MediaError::Timeout(30).is_transient());
        assert!(MediaError::unavailable("libre", "503").is_transient());
        assert!(MediaError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe")).is_transient());

        assert!(!MediaError::ffmpeg_failed("exit 1", None, Some(1)).is_transient());
        assert!(!MediaError::rejected("libre", "bad language").is_transient());
        assert!(!MediaError::CountMismatch { expected: 2, actual: 1 }.is_transient());
        assert!(!MediaError::FfmpegNotFound.is_transient());
    }
}
