//! In-memory job repository for tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reframe_models::{Job, JobError, JobId, NewJob, StageResult};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{RepoError, RepoResult};
use crate::repository::{JobFilter, JobRepository};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    /// Dedupe key -> job
    dedupe: HashMap<String, JobId>,
}

/// Job repository held in process memory.
///
/// Each transition runs under a single write lock, so the expected-stage
/// check and the write are atomic.
#[derive(Debug, Default)]
pub struct MemoryJobRepository {
    state: RwLock<State>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `transition` to a copy of the job and store it on success.
    async fn update<F>(&self, id: &JobId, transition: F) -> RepoResult<Job>
    where
        F: FnOnce(&mut Job) -> RepoResult<()> + Send,
    {
        let mut state = self.state.write().await;
        let stored = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| RepoError::not_found(id))?;

        let mut next = stored.clone();
        transition(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, request: NewJob) -> RepoResult<Job> {
        let mut state = self.state.write().await;

        if let Some(key) = &request.dedupe_key {
            if let Some(existing) = state.dedupe.get(key).and_then(|id| state.jobs.get(id)) {
                if existing.payload_fingerprint == request.fingerprint() {
                    debug!(job_id = %existing.id, dedupe_key = %key, "Returning deduplicated job");
                    return Ok(existing.clone());
                }
                return Err(RepoError::DedupeConflict(key.clone()));
            }
        }

        let job = Job::from_request(request);
        if let Some(key) = &job.dedupe_key {
            state.dedupe.insert(key.clone(), job.id.clone());
        }
        state.jobs.insert(job.id.clone(), job.clone());

        info!(job_id = %job.id, job_type = %job.job_type, stages = job.stages.len(), "Created job");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> RepoResult<Job> {
        self.state
            .read()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found(id))
    }

    async fn begin_attempt(&self, id: &JobId, expected_stage_index: usize) -> RepoResult<Job> {
        self.update(id, |job| {
            job.begin_attempt(expected_stage_index)?;
            Ok(())
        })
        .await
    }

    async fn advance(
        &self,
        id: &JobId,
        expected_stage_index: usize,
        result: StageResult,
    ) -> RepoResult<Job> {
        self.update(id, |job| Ok(job.advance(expected_stage_index, &result)?))
            .await
    }

    async fn fail(&self, id: &JobId, expected_stage_index: usize, error: JobError) -> RepoResult<Job> {
        self.update(id, |job| Ok(job.fail(expected_stage_index, error)?))
            .await
    }

    async fn cancel(&self, id: &JobId) -> RepoResult<Job> {
        self.update(id, |job| Ok(job.cancel()?)).await
    }

    async fn request_cancel(&self, id: &JobId) -> RepoResult<Job> {
        self.update(id, |job| Ok(job.request_cancel()?)).await
    }

    async fn update_progress(&self, id: &JobId, value: f64) -> RepoResult<Job> {
        self.update(id, |job| {
            job.update_progress(value);
            Ok(())
        })
        .await
    }

    async fn list(&self, filter: &JobFilter) -> RepoResult<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(filter.limit);
        Ok(jobs)
    }

    async fn list_expired(&self, before: DateTime<Utc>) -> RepoResult<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.is_terminal() && job.updated_at < before)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> RepoResult<bool> {
        let mut state = self.state.write().await;
        let Some(job) = state.jobs.remove(id) else {
            return Ok(false);
        };
        if let Some(key) = &job.dedupe_key {
            if state.dedupe.get(key) == Some(id) {
                state.dedupe.remove(key);
            }
        }
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reframe_models::{AssetId, ErrorKind, JobConfig, JobStatus, JobType, StageName};
    use std::sync::Arc;

    fn captions() -> NewJob {
        NewJob::new(JobType::Captions, vec![AssetId::from("video-1")])
    }

    #[tokio::test]
    async fn test_dedupe_returns_same_job() {
        let repo = MemoryJobRepository::new();
        let a = repo.create(captions().with_dedupe_key("k")).await.unwrap();
        let b = repo.create(captions().with_dedupe_key("k")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(repo.list(&JobFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dedupe_conflict_on_different_payload() {
        let repo = MemoryJobRepository::new();
        repo.create(captions().with_dedupe_key("k")).await.unwrap();

        let mut config = JobConfig::new();
        config.insert("language".into(), serde_json::json!("fr"));
        let err = repo
            .create(captions().with_config(config).with_dedupe_key("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::DedupeConflict(k) if k == "k"));
    }

    #[tokio::test]
    async fn test_concurrent_advance_has_one_winner() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job = repo.create(captions()).await.unwrap();
        repo.begin_attempt(&job.id, 0).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let repo = repo.clone();
            let id = job.id.clone();
            handles.push(tokio::spawn(async move {
                repo.advance(&id, 0, StageResult::new(vec![AssetId::from(format!("out-{n}"))]))
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, RepoError::StaleTransition { expected: 0, actual: 1 })),
            }
        }
        assert_eq!(winners, 1);

        let stored = repo.get(&job.id).await.unwrap();
        assert_eq!(stored.stage_index, 1);
        assert_eq!(stored.output_asset_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_transition_leaves_job_untouched() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(captions()).await.unwrap();
        let before = repo.begin_attempt(&job.id, 0).await.unwrap();

        assert!(repo.advance(&job.id, 3, StageResult::default()).await.is_err());
        assert_eq!(repo.get(&job.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_fail_then_reject_advance() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(captions()).await.unwrap();
        repo.begin_attempt(&job.id, 0).await.unwrap();
        let failed = repo
            .fail(
                &job.id,
                0,
                JobError::new(Some(StageName::ExtractAudio), ErrorKind::Permanent, "no audio stream"),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);

        let err = repo.advance(&job.id, 0, StageResult::default()).await.unwrap_err();
        assert!(matches!(err, RepoError::Terminal(JobStatus::Failed)));
    }

    #[tokio::test]
    async fn test_list_expired_and_delete() {
        let repo = MemoryJobRepository::new();
        let done = repo.create(captions().with_dedupe_key("old")).await.unwrap();
        repo.request_cancel(&done.id).await.unwrap();
        let live = repo.create(captions()).await.unwrap();

        let expired = repo
            .list_expired(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, done.id);

        assert!(repo.delete(&done.id).await.unwrap());
        assert!(!repo.delete(&done.id).await.unwrap());
        assert!(repo.get(&live.id).await.is_ok());

        // The dedupe key is free again.
        let again = repo.create(captions().with_dedupe_key("old")).await.unwrap();
        assert_ne!(again.id, done.id);
    }

    #[tokio::test]
    async fn test_update_progress_clamps() {
        let repo = MemoryJobRepository::new();
        let job = repo.create(captions()).await.unwrap();
        repo.begin_attempt(&job.id, 0).await.unwrap();
        repo.update_progress(&job.id, 0.4).await.unwrap();
        let job = repo.update_progress(&job.id, 0.1).await.unwrap();
        assert_eq!(job.progress, 0.4);
    }
}
