//! Storage errors.

use std::fmt;

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Backend operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Put,
    Get,
    Delete,
    List,
    Presign,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageOp::Put => "put",
            StorageOp::Get => "get",
            StorageOp::Delete => "delete",
            StorageOp::List => "list",
            StorageOp::Presign => "presign",
        })
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage misconfigured: {0}")]
    Config(String),

    #[error("asset not found: {0}")]
    NotFound(String),

    /// Key escapes the store namespace or is otherwise unusable.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("{op} failed: {message}")]
    Backend { op: StorageOp, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("asset metadata: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    pub fn backend(op: StorageOp, message: impl Into<String>) -> Self {
        Self::Backend {
            op,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Presigning is local computation; a failure there will repeat.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Backend { op, .. } => *op != StorageOp::Presign,
            StorageError::Io(_) => true,
            _ => false,
        }
    }
}
