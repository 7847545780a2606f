//! Job handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use reframe_jobs::JobFilter;
use reframe_models::{AssetId, Job, JobConfig, JobId, JobStatus, JobType, NewJob};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Largest page `GET /jobs` returns.
const MAX_LIST_LIMIT: usize = 500;

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    #[validate(length(min = 1, max = 8))]
    pub input_asset_ids: Vec<AssetId>,
    #[serde(default)]
    pub config: JobConfig,
    /// Client key making retries of the same request idempotent
    #[validate(length(min = 1, max = 256))]
    pub dedupe_key: Option<String>,
}

/// POST /api/v1/jobs
///
/// Returns 201 with the job. Repeating a request with the same dedupe key and
/// payload returns the original job; a different payload is a 409.
pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let Json(request) = payload.map_err(|e| ApiError::validation(e.body_text()))?;
    request.validate()?;

    let mut new_job = NewJob::new(request.job_type, request.input_asset_ids).with_config(request.config);
    if let Some(key) = request.dedupe_key {
        new_job = new_job.with_dedupe_key(key);
    }

    let job = state.service.create_job(new_job).await?;
    metrics::record_job_created(job.job_type.as_str());
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    #[serde(alias = "status_filter")]
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<usize>,
}

impl ListJobsQuery {
    fn into_filter(self) -> ApiResult<JobFilter> {
        let mut filter = JobFilter::default();
        if let Some(status) = self.status.filter(|s| !s.is_empty()) {
            filter.status = Some(
                JobStatus::parse(&status)
                    .ok_or_else(|| ApiError::validation(format!("unknown job status: {status}")))?,
            );
        }
        if let Some(job_type) = self.job_type.filter(|s| !s.is_empty()) {
            filter.job_type = Some(
                serde_json::from_value(serde_json::Value::String(job_type.clone()))
                    .map_err(|_| ApiError::validation(format!("unknown job type: {job_type}")))?,
            );
        }
        if let Some(limit) = self.limit {
            filter.limit = limit.clamp(1, MAX_LIST_LIMIT);
        }
        Ok(filter)
    }
}

/// GET /api/v1/jobs?status=&job_type=&limit=
///
/// Newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Job>>> {
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    let filter = query.into_filter()?;
    Ok(Json(state.service.list_jobs(&filter).await?))
}

/// GET /api/v1/jobs/:id
pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    Ok(Json(state.service.get_job(&JobId::from_string(id)).await?))
}

/// POST /api/v1/jobs/:id/cancel
///
/// Requests cooperative cancellation; the worker stops the job at its next
/// checkpoint. Cancelling a finished job is a 409.
pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    let job = state.service.cancel(&JobId::from_string(id)).await?;
    metrics::record_cancel_requested();
    info!(job_id = %job.id, status = %job.status, "Cancel requested via API");
    Ok(Json(job))
}
