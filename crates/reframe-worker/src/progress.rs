//! Job progress reporting.
//!
//! Progress of a job is `(stage_index + fraction) / total_stages`. The
//! reporter never lets the value go below the last one it recorded, and
//! the repository applies the same clamp.

use std::sync::{Arc, Mutex};

use reframe_jobs::JobRepository;
use reframe_media::{FfmpegProgress, ProgressCallback};
use reframe_models::{Job, JobId, JobStatus, StageName};
use reframe_queue::{ProgressEvent, ProgressPublisher};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Progress sink for one stage attempt.
pub struct ProgressReporter {
    job_id: JobId,
    stage: StageName,
    stage_index: usize,
    total_stages: usize,
    repo: Arc<dyn JobRepository>,
    publisher: Option<Arc<dyn ProgressPublisher>>,
    last: Mutex<f64>,
}

impl ProgressReporter {
    /// Reporter for the job's current stage, starting from its stored
    /// progress.
    pub fn new(
        job: &Job,
        repo: Arc<dyn JobRepository>,
        publisher: Option<Arc<dyn ProgressPublisher>>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            stage: job.current_stage().unwrap_or(StageName::ExtractAudio),
            stage_index: job.stage_index,
            total_stages: job.total_stages().max(1),
            repo,
            publisher,
            last: Mutex::new(job.progress),
        }
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Overall job progress for a fraction of the current stage.
    pub fn overall(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        ((self.stage_index as f64 + fraction) / self.total_stages as f64).clamp(0.0, 1.0)
    }

    /// Last value recorded by this reporter.
    pub fn last(&self) -> f64 {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report that `fraction` of the current stage is done.
    ///
    /// Returns the new overall value, or `None` when it would not raise
    /// progress. Repository and publish failures are logged, never returned.
    pub async fn report(&self, fraction: f64) -> Option<f64> {
        let value = self.overall(fraction);
        {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if value <= *last {
                return None;
            }
            *last = value;
        }

        if let Err(e) = self.repo.update_progress(&self.job_id, value).await {
            warn!(job_id = %self.job_id, "Failed to store progress: {}", e);
        }
        self.publish(value, None).await;
        Some(value)
    }

    /// Publish a message at the current progress value.
    pub async fn message(&self, message: impl Into<String>) {
        self.publish(self.last(), Some(message.into())).await;
    }

    async fn publish(&self, value: f64, message: Option<String>) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let mut event = ProgressEvent::new(
            self.job_id.clone(),
            Some(self.stage),
            self.stage_index,
            value,
            JobStatus::Running,
        );
        if let Some(message) = message {
            event = event.with_message(message);
        }
        if let Err(e) = publisher.publish(&event).await {
            debug!(job_id = %self.job_id, "Failed to publish progress: {}", e);
        }
    }

    /// Callback for ffmpeg progress blocks, reporting the fraction of
    /// `total_secs` encoded so far.
    ///
    /// Updates are forwarded by a background task that ends when the
    /// callback is dropped; only the latest value is kept.
    pub fn ffmpeg_callback(self: &Arc<Self>, total_secs: f64) -> ProgressCallback {
        let (tx, mut rx) = watch::channel(0.0f64);
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let fraction = *rx.borrow_and_update();
                reporter.report(fraction).await;
            }
        });

        Box::new(move |progress: FfmpegProgress| {
            // Cap below 1.0; the stage is done only when its outputs exist.
            let _ = tx.send(progress.fraction(total_secs).min(0.99));
        })
    }
}

/// Publish a terminal or lifecycle event outside of a stage.
pub async fn publish_status(
    publisher: Option<&Arc<dyn ProgressPublisher>>,
    job: &Job,
    message: Option<String>,
) {
    let Some(publisher) = publisher else {
        return;
    };
    let mut event = ProgressEvent::new(
        job.id.clone(),
        job.current_stage(),
        job.stage_index,
        job.progress,
        job.status,
    );
    if let Some(message) = message {
        event = event.with_message(message);
    }
    if let Err(e) = publisher.publish(&event).await {
        debug!(job_id = %job.id, "Failed to publish status: {}", e);
    }
}
