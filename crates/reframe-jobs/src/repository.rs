//! The `JobRepository` abstraction and backend selection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reframe_models::{Job, JobError, JobId, JobStatus, JobType, NewJob, StageResult};

use crate::error::{RepoError, RepoResult};
use crate::memory::MemoryJobRepository;
use crate::redis_repo::RedisJobRepository;

/// Query for [`JobRepository::list`].
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            limit: 50,
        }
    }
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.job_type == t)
    }
}

/// Durable job records with compare-and-set transitions.
///
/// Transitions that name an expected stage index fail with
/// [`RepoError::StaleTransition`] when the job has moved on, and with
/// [`RepoError::Terminal`] once it is finished.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a job, or return the existing one when `dedupe_key` was already
    /// used with an identical payload.
    async fn create(&self, request: NewJob) -> RepoResult<Job>;

    async fn get(&self, id: &JobId) -> RepoResult<Job>;

    /// Start a new attempt of the stage at `expected_stage_index`.
    async fn begin_attempt(&self, id: &JobId, expected_stage_index: usize) -> RepoResult<Job>;

    /// Record the stage result and move to the next stage.
    async fn advance(
        &self,
        id: &JobId,
        expected_stage_index: usize,
        result: StageResult,
    ) -> RepoResult<Job>;

    async fn fail(&self, id: &JobId, expected_stage_index: usize, error: JobError) -> RepoResult<Job>;

    /// Move to `Cancelled`, keeping recorded outputs.
    async fn cancel(&self, id: &JobId) -> RepoResult<Job>;

    /// Flag for cooperative cancellation; unstarted jobs cancel at once.
    async fn request_cancel(&self, id: &JobId) -> RepoResult<Job>;

    /// Raise progress. Lower values leave the job unchanged.
    async fn update_progress(&self, id: &JobId, value: f64) -> RepoResult<Job>;

    /// Jobs matching `filter`, newest first.
    async fn list(&self, filter: &JobFilter) -> RepoResult<Vec<Job>>;

    /// Terminal jobs last updated before `before`.
    async fn list_expired(&self, before: DateTime<Utc>) -> RepoResult<Vec<Job>>;

    /// Remove a job record. Returns whether it existed.
    async fn delete(&self, id: &JobId) -> RepoResult<bool>;

    fn backend_name(&self) -> &'static str;
}

/// Repository backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoBackend {
    #[default]
    Memory,
    Redis,
}

impl RepoBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }
}

/// Repository configuration.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub backend: RepoBackend,
    pub redis_url: String,
    /// Prefix for every Redis key the repository owns
    pub prefix: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            backend: RepoBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "reframe:".to_string(),
        }
    }
}

impl RepoConfig {
    /// Create config from environment variables.
    pub fn from_env() -> RepoResult<Self> {
        let defaults = Self::default();
        let backend = match std::env::var("REFRAME_REPO_BACKEND") {
            Ok(value) => RepoBackend::parse(&value).ok_or_else(|| {
                RepoError::ConfigError(format!("unknown REFRAME_REPO_BACKEND: {}", value))
            })?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            prefix: std::env::var("REFRAME_REPO_PREFIX").unwrap_or(defaults.prefix),
        })
    }
}

/// Build the configured repository.
pub fn build_repository(config: &RepoConfig) -> RepoResult<Arc<dyn JobRepository>> {
    Ok(match config.backend {
        RepoBackend::Memory => Arc::new(MemoryJobRepository::new()),
        RepoBackend::Redis => Arc::new(RedisJobRepository::new(&config.redis_url, &config.prefix)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reframe_models::AssetId;

    #[test]
    fn test_filter_matches() {
        let job = Job::from_request(NewJob::new(JobType::Captions, vec![AssetId::from("a")]));
        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter::default().with_status(JobStatus::Queued).matches(&job));
        assert!(!JobFilter::default().with_status(JobStatus::Failed).matches(&job));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(RepoBackend::parse("Redis"), Some(RepoBackend::Redis));
        assert_eq!(RepoBackend::parse("firestore"), None);
    }
}
