//! Job records and their state machine.
//!
//! Every mutation goes through a transition method that checks the expected
//! stage index first, so repository backends only need to persist the result
//! atomically.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::asset::AssetId;
use crate::stage::{plan_stages, StageName};

/// Stage-specific job configuration.
pub type JobConfig = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Type of job, which fixes its stage plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Captions,
    Translate,
    StyleRender,
    Shorts,
    MergeAv,
    CutClip,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Captions => "captions",
            JobType::Translate => "translate",
            JobType::StyleRender => "style-render",
            JobType::Shorts => "shorts",
            JobType::MergeAv => "merge-av",
            JobType::CutClip => "cut-clip",
        }
    }

    /// Allowed number of input assets (inclusive bounds).
    pub fn input_arity(&self) -> (usize, usize) {
        match self {
            JobType::StyleRender => (1, 2),
            JobType::MergeAv => (2, 2),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for the first stage to start
    #[default]
    Queued,
    /// At least one stage attempt has begun
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or configuration, never retried
    Validation,
    /// I/O hiccup or engine timeout, retried with backoff
    Transient,
    /// Engine rejected the media
    Permanent,
    /// Cooperative cancellation was observed
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User-visible failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(stage: Option<StageName>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

/// How a stage attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    /// Superseded by a later attempt of the same stage
    Retried,
    Failed,
    Cancelled,
}

/// One attempt of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageRecord {
    pub stage: StageName,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StageOutcome>,
}

/// Result of a successful stage, handed to `advance`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub output_asset_ids: Vec<AssetId>,
}

impl StageResult {
    pub fn new(output_asset_ids: Vec<AssetId>) -> Self {
        Self { output_asset_ids }
    }
}

/// Request to create a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NewJob {
    pub job_type: JobType,
    pub input_asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

impl NewJob {
    pub fn new(job_type: JobType, input_asset_ids: Vec<AssetId>) -> Self {
        Self {
            job_type,
            input_asset_ids,
            config: JobConfig::new(),
            dedupe_key: None,
        }
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Hash of everything that defines the work, excluding the dedupe key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.job_type.as_str().as_bytes());
        for id in &self.input_asset_ids {
            hasher.update(b"\0");
            hasher.update(id.as_str().as_bytes());
        }
        hasher.update(b"\0");
        // serde_json maps are ordered by key, so this is stable.
        hasher.update(serde_json::Value::Object(self.config.clone()).to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("stale transition: expected stage {expected}, job is at stage {actual}")]
    StaleTransition { expected: usize, actual: usize },

    #[error("job is already {0}")]
    Terminal(JobStatus),
}

/// A tracked, multi-stage unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    #[serde(default)]
    pub status: JobStatus,
    /// Planned stages, fixed at creation
    pub stages: Vec<StageName>,
    /// Index of the next stage to run
    #[serde(default)]
    pub stage_index: usize,
    /// Attempt number of the current stage (0 before the first attempt)
    #[serde(default)]
    pub attempt: u32,
    /// Progress in 0..=1
    #[serde(default)]
    pub progress: f64,
    pub input_asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub output_asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    pub payload_fingerprint: String,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub history: Vec<StageRecord>,
    /// Compare-and-set token, bumped on every write
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a queued job from a creation request.
    pub fn from_request(request: NewJob) -> Self {
        let now = Utc::now();
        let payload_fingerprint = request.fingerprint();
        let stages = plan_stages(request.job_type, request.input_asset_ids.len());

        Self {
            id: JobId::new(),
            job_type: request.job_type,
            status: JobStatus::Queued,
            stages,
            stage_index: 0,
            attempt: 0,
            progress: 0.0,
            input_asset_ids: request.input_asset_ids,
            output_asset_ids: Vec::new(),
            config: request.config,
            error: None,
            dedupe_key: request.dedupe_key,
            payload_fingerprint,
            cancel_requested: false,
            history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stage at `stage_index`, if any remain.
    pub fn current_stage(&self) -> Option<StageName> {
        self.stages.get(self.stage_index).copied()
    }

    pub fn total_stages(&self) -> usize {
        self.stages.len()
    }

    /// Progress baseline for the start of a stage.
    pub fn stage_baseline(&self, stage_index: usize) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        (stage_index as f64 / self.stages.len() as f64).clamp(0.0, 1.0)
    }

    fn check_expected(&self, expected_stage_index: usize) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if self.stage_index != expected_stage_index {
            return Err(TransitionError::StaleTransition {
                expected: expected_stage_index,
                actual: self.stage_index,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    fn close_open_record(&mut self, outcome: StageOutcome) {
        if let Some(record) = self.history.last_mut() {
            if record.outcome.is_none() {
                record.outcome = Some(outcome);
                record.finished_at = Some(Utc::now());
            }
        }
    }

    /// Start a new attempt of the current stage and return its number.
    pub fn begin_attempt(&mut self, expected_stage_index: usize) -> Result<u32, TransitionError> {
        self.check_expected(expected_stage_index)?;
        let Some(stage) = self.current_stage() else {
            return Err(TransitionError::StaleTransition {
                expected: expected_stage_index,
                actual: self.stages.len(),
            });
        };

        self.close_open_record(StageOutcome::Retried);

        let now = Utc::now();
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.started_at.get_or_insert(now);
        self.progress = self.progress.max(self.stage_baseline(self.stage_index));
        self.history.push(StageRecord {
            stage,
            attempt: self.attempt,
            started_at: now,
            finished_at: None,
            outcome: None,
        });
        self.touch();
        Ok(self.attempt)
    }

    /// Record a finished stage and move to the next one.
    pub fn advance(
        &mut self,
        expected_stage_index: usize,
        result: &StageResult,
    ) -> Result<(), TransitionError> {
        self.check_expected(expected_stage_index)?;

        for id in &result.output_asset_ids {
            if !self.output_asset_ids.contains(id) {
                self.output_asset_ids.push(id.clone());
            }
        }
        self.close_open_record(StageOutcome::Succeeded);

        self.stage_index += 1;
        self.attempt = 0;
        self.status = JobStatus::Running;
        self.progress = self.progress.max(self.stage_baseline(self.stage_index));

        if self.stage_index >= self.stages.len() {
            self.status = JobStatus::Completed;
            self.progress = 1.0;
            self.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Move to `Failed` with a structured error.
    pub fn fail(&mut self, expected_stage_index: usize, error: JobError) -> Result<(), TransitionError> {
        self.check_expected(expected_stage_index)?;
        self.close_open_record(StageOutcome::Failed);
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Move to `Cancelled`, keeping outputs already recorded.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        self.close_open_record(StageOutcome::Cancelled);
        self.status = JobStatus::Cancelled;
        self.cancel_requested = true;
        self.error = Some(JobError::new(
            self.current_stage(),
            ErrorKind::Cancelled,
            "cancellation requested",
        ));
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Flag the job for cooperative cancellation.
    ///
    /// A job that never started is cancelled immediately.
    pub fn request_cancel(&mut self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if self.status == JobStatus::Queued && self.stage_index == 0 && self.attempt == 0 {
            return self.cancel();
        }
        if !self.cancel_requested {
            self.cancel_requested = true;
            self.touch();
        }
        Ok(())
    }

    /// Raise progress to `value`. Lower values are ignored.
    ///
    /// Returns whether the stored value changed.
    pub fn update_progress(&mut self, value: f64) -> bool {
        if self.is_terminal() || !value.is_finite() {
            return false;
        }
        let value = value.clamp(0.0, 1.0);
        if value <= self.progress {
            return false;
        }
        self.progress = value;
        self.touch();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shorts_job() -> Job {
        Job::from_request(NewJob::new(JobType::Shorts, vec![AssetId::from("video-1")]))
    }

    #[test]
    fn test_job_creation() {
        let job = shorts_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stages.len(), 4);
        assert_eq!(job.current_stage(), Some(StageName::ExtractAudio));
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_full_run_reaches_completed() {
        let mut job = shorts_job();
        for idx in 0..job.total_stages() {
            assert_eq!(job.begin_attempt(idx).unwrap(), 1);
            job.advance(idx, &StageResult::new(vec![AssetId::from(format!("out-{idx}"))]))
                .unwrap();
        }
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
        assert_eq!(job.output_asset_ids.len(), 4);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_stale_advance_is_rejected() {
        let mut job = shorts_job();
        job.begin_attempt(0).unwrap();
        job.advance(0, &StageResult::default()).unwrap();

        let err = job.advance(0, &StageResult::default()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::StaleTransition {
                expected: 0,
                actual: 1
            }
        );
    }

    #[test]
    fn test_terminal_job_rejects_advance() {
        let mut job = shorts_job();
        job.begin_attempt(0).unwrap();
        job.fail(0, JobError::new(Some(StageName::ExtractAudio), ErrorKind::Permanent, "bad media"))
            .unwrap();

        let err = job.advance(0, &StageResult::default()).unwrap_err();
        assert_eq!(err, TransitionError::Terminal(JobStatus::Failed));
    }

    #[test]
    fn test_retry_marks_previous_attempt() {
        let mut job = shorts_job();
        assert_eq!(job.begin_attempt(0).unwrap(), 1);
        assert_eq!(job.begin_attempt(0).unwrap(), 2);
        assert_eq!(job.history.len(), 2);
        assert_eq!(job.history[0].outcome, Some(StageOutcome::Retried));
        assert_eq!(job.history[1].outcome, None);
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut job = shorts_job();
        job.begin_attempt(0).unwrap();
        assert!(job.update_progress(0.2));
        assert!(!job.update_progress(0.1));
        assert_eq!(job.progress, 0.2);
        assert!(job.update_progress(7.0));
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn test_request_cancel_on_queued_job_cancels_immediately() {
        let mut job = shorts_job();
        job.request_cancel().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_request_cancel_on_running_job_sets_flag() {
        let mut job = shorts_job();
        job.begin_attempt(0).unwrap();
        job.advance(0, &StageResult::new(vec![AssetId::from("audio")])).unwrap();
        job.request_cancel().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.cancel_requested);

        job.cancel().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.output_asset_ids, vec![AssetId::from("audio")]);
    }

    #[test]
    fn test_fingerprint_ignores_dedupe_key() {
        let mut config = JobConfig::new();
        config.insert("max_clips".into(), serde_json::json!(3));
        let a = NewJob::new(JobType::Shorts, vec![AssetId::from("v")])
            .with_config(config.clone())
            .with_dedupe_key("k1");
        let b = NewJob::new(JobType::Shorts, vec![AssetId::from("v")])
            .with_config(config)
            .with_dedupe_key("k2");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = NewJob::new(JobType::Shorts, vec![AssetId::from("w")]);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_job_serde_roundtrip() {
        let job = shorts_job();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"job_type\":\"shorts\""));
        assert!(json.contains("\"extract-audio\""));
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, job);
    }
}
