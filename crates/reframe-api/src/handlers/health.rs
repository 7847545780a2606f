//! Liveness and readiness probes.

use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use reframe_jobs::JobFilter;
use serde::Serialize;

use crate::metrics;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    /// `ready` or `degraded`
    pub status: &'static str,
    pub repository: DependencyCheck,
    pub queue: DependencyCheck,
    /// Ready plus pending stage tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<u64>,
}

#[derive(Serialize)]
pub struct DependencyCheck {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn probe<T, E, F>(call: F) -> (DependencyCheck, Option<T>)
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = call.await;
    let latency_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(value) => (
            DependencyCheck {
                ok: true,
                latency_ms,
                error: None,
            },
            Some(value),
        ),
        Err(e) => (
            DependencyCheck {
                ok: false,
                latency_ms,
                error: Some(e.to_string()),
            },
            None,
        ),
    }
}

/// GET /ready
///
/// 503 when the job repository or the task queue cannot be reached.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let filter = JobFilter {
        limit: 1,
        ..JobFilter::default()
    };
    let (repository, _) = probe(state.service.repository().list(&filter)).await;
    let (queue, queue_length) = probe(state.queue.len()).await;

    if let Some(len) = queue_length {
        metrics::set_queue_length(len);
    }

    let healthy = repository.ok && queue.ok;
    let response = ReadinessResponse {
        status: if healthy { "ready" } else { "degraded" },
        repository,
        queue,
        queue_length,
    };

    if healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
