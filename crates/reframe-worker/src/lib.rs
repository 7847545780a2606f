//! Stage worker for the Reframe pipeline.
//!
//! This crate provides:
//! - Stage executors for extract-audio, transcribe, translate, style-render,
//!   merge, segment selection and clip cutting
//! - The transcript segment selector
//! - Cooperative cancellation and monotonic progress reporting
//! - The competing-consumer dispatcher with per-stage retries
//! - The retention sweeper

pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod retention;
pub mod retry;
pub mod selector;
pub mod stage;

pub use cancel::CancellationToken;
pub use config::{RetentionConfig, WorkerConfig};
pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use progress::ProgressReporter;
pub use retention::{RetentionSweeper, SweepReport};
pub use retry::{FailureTracker, RetryPolicy};
pub use selector::{SegmentSelector, SelectorConfig};
pub use stage::{
    Collaborators, OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput,
    StageRegistry,
};
