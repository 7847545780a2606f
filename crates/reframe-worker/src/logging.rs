//! Structured job logging utilities.
//!
//! Provides consistent log lines for stage execution, carrying the job id,
//! stage and attempt on every event.

use reframe_models::{JobId, StageName};
use tracing::{error, info, warn, Span};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: StageName,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: StageName, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt = self.attempt,
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt = self.attempt,
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt = self.attempt,
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt = self.attempt,
            "Stage error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            attempt = self.attempt,
            "Stage completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Span wrapping one stage attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stage",
            job_id = %self.job_id,
            stage = %self.stage,
            attempt = self.attempt
        )
    }
}
