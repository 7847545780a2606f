//! Stage-task queue for the reframe pipeline.
//!
//! This crate provides:
//! - The `TaskQueue` trait with Redis Streams and in-memory backends
//! - Per-`(job, stage)` enqueue dedupe, redelivery of idle tasks and a DLQ
//! - Progress events via Redis Pub/Sub

pub mod error;
pub mod memory;
pub mod progress;
pub mod queue;
pub mod task;

pub use error::{QueueError, QueueResult};
pub use memory::{DeadLetter, MemoryTaskQueue};
pub use progress::{ProgressChannel, ProgressEvent, ProgressPublisher};
pub use queue::{QueueConfig, RedisTaskQueue, TaskQueue};
pub use task::{Delivery, StageTask};
