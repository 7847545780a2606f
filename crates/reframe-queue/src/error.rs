//! Queue errors.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// XADD failed after the dedupe marker was written; the marker was rolled back.
    #[error("failed to enqueue stage task: {0}")]
    Enqueue(String),

    /// Ack or nack for a message id this consumer never received.
    #[error("no pending delivery with id {0}")]
    UnknownDelivery(String),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl QueueError {
    pub fn enqueue(msg: impl Into<String>) -> Self {
        Self::Enqueue(msg.into())
    }
}
