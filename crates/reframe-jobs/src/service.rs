//! Request-facing job operations shared by the API and tooling.

use std::sync::Arc;

use reframe_models::{validate_request, AssetId, AssetKind, Job, JobId, MediaAsset, NewJob};
use reframe_queue::{QueueError, StageTask, TaskQueue};
use reframe_storage::{AssetLocator, AssetStore, PutRequest, StorageError};
use thiserror::Error;
use tracing::{error, info};

use crate::error::RepoError;
use crate::repository::{JobFilter, JobRepository};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced to callers of [`JobService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Repo(RepoError),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<RepoError> for ServiceError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(id) => ServiceError::NotFound(format!("job {}", id)),
            RepoError::DedupeConflict(_) | RepoError::Terminal(_) => {
                ServiceError::Conflict(e.to_string())
            }
            RepoError::Validation(msg) => ServiceError::Validation(msg),
            other => ServiceError::Repo(other),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => ServiceError::NotFound(format!("asset {}", id)),
            StorageError::InvalidKey(key) => ServiceError::Validation(format!("invalid key: {}", key)),
            other => ServiceError::Storage(other),
        }
    }
}

/// Job and asset operations over a repository, a queue and a store.
#[derive(Clone)]
pub struct JobService {
    repo: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn AssetStore>,
}

impl JobService {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        Self { repo, queue, store }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// Validate, persist and enqueue the first stage of a job.
    ///
    /// A repeated dedupe key returns the existing job. The first stage is
    /// (re-)enqueued only while the job has not started; the queue drops
    /// duplicates.
    pub async fn create_job(&self, request: NewJob) -> ServiceResult<Job> {
        validate_request(&request).map_err(|e| ServiceError::Validation(e.to_string()))?;

        for id in &request.input_asset_ids {
            match self.store.metadata(id).await {
                Ok(_) => {}
                Err(StorageError::NotFound(_)) => {
                    return Err(ServiceError::Validation(format!("input asset {} does not exist", id)))
                }
                Err(e) => return Err(e.into()),
            }
        }

        let job = self.repo.create(request).await?;

        if !job.is_terminal() && job.stage_index == 0 && job.attempt == 0 {
            if let Err(e) = self.queue.enqueue(&StageTask::new(job.id.clone(), 0)).await {
                error!(job_id = %job.id, "Failed to enqueue first stage: {}", e);
                return Err(e.into());
            }
        }

        info!(job_id = %job.id, job_type = %job.job_type, "Job accepted");
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> ServiceResult<Job> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> ServiceResult<Vec<Job>> {
        Ok(self.repo.list(filter).await?)
    }

    /// Request cooperative cancellation.
    pub async fn cancel(&self, id: &JobId) -> ServiceResult<Job> {
        let job = self.repo.request_cancel(id).await?;
        info!(job_id = %id, status = %job.status, "Cancellation requested");
        Ok(job)
    }

    pub async fn get_asset(&self, id: &AssetId) -> ServiceResult<AssetLocator> {
        Ok(self.store.get(id).await?)
    }

    /// Store a client upload under a generated key.
    pub async fn upload_asset(
        &self,
        data: Vec<u8>,
        kind: AssetKind,
        mime_type: Option<String>,
    ) -> ServiceResult<MediaAsset> {
        if data.is_empty() {
            return Err(ServiceError::Validation("empty upload".to_string()));
        }
        let mime = mime_type.unwrap_or_else(|| kind.default_mime().to_string());
        let asset = self.store.put(PutRequest::bytes(data, kind, mime)).await?;
        info!(asset_id = %asset.id, kind = %asset.kind.as_str(), size = asset.size_bytes, "Asset uploaded");
        Ok(asset)
    }

    /// Asset metadata and content.
    pub async fn read_asset(&self, id: &AssetId) -> ServiceResult<(MediaAsset, Vec<u8>)> {
        let asset = self.store.metadata(id).await?;
        let bytes = self.store.read(id).await?;
        Ok((asset, bytes))
    }
}
