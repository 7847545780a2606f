//! Worker metrics.

use metrics::{counter, histogram};
use reframe_models::{JobStatus, StageName};

pub mod names {
    /// Stage attempts by stage and outcome kind.
    pub const STAGE_ATTEMPTS_TOTAL: &str = "reframe_worker_stage_attempts_total";
    pub const STAGE_DURATION_SECONDS: &str = "reframe_worker_stage_duration_seconds";
    /// Transient stage failures that were retried.
    pub const STAGE_RETRIES_TOTAL: &str = "reframe_worker_stage_retries_total";
    /// Jobs reaching a terminal state, by status.
    pub const JOBS_FINISHED_TOTAL: &str = "reframe_worker_jobs_finished_total";
    /// Deliveries dropped because the job had already moved on.
    pub const STALE_TASKS_TOTAL: &str = "reframe_worker_stale_tasks_total";
    pub const RETENTION_DELETED_TOTAL: &str = "reframe_worker_retention_deleted_total";
}

/// Record one finished stage attempt. `outcome` is `ok` or an error kind.
pub fn record_stage_attempt(stage: StageName, outcome: &'static str, duration_secs: f64) {
    counter!(
        names::STAGE_ATTEMPTS_TOTAL,
        "stage" => stage.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(duration_secs);
}

pub fn record_stage_retry(stage: StageName) {
    counter!(names::STAGE_RETRIES_TOTAL, "stage" => stage.as_str()).increment(1);
}

pub fn record_job_finished(status: JobStatus) {
    counter!(names::JOBS_FINISHED_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn record_stale_task() {
    counter!(names::STALE_TASKS_TOTAL).increment(1);
}

/// `what` is one of `jobs`, `assets` or `scratch`.
pub fn record_retention_deleted(what: &'static str, count: usize) {
    if count > 0 {
        counter!(names::RETENTION_DELETED_TOTAL, "kind" => what).increment(count as u64);
    }
}
