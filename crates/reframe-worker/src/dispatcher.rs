//! Competing-consumer stage dispatcher.
//!
//! Each delivery names one `(job, stage_index)`. The dispatcher checks the
//! job is still at that stage, runs the stage's executor with retries, and
//! advances the job through the repository's compare-and-set before the next
//! stage is enqueued. A delivery is acknowledged once the job record reflects
//! its outcome; infrastructure failures leave it pending so another consumer
//! can claim it.
//!
//! While a stage runs, its delivery's lease is refreshed every
//! [`WorkerConfig::lease_heartbeat`] so the claim loop of other consumers
//! only picks up tasks whose consumer actually stopped.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reframe_jobs::{with_retry, JobRepository, RepoError, RetryConfig};
use reframe_models::{Job, JobError, JobStatus, StageName, StageResult};
use reframe_queue::{Delivery, ProgressPublisher, StageTask, TaskQueue};
use reframe_storage::{AssetStore, SCRATCH_PREFIX};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::progress::{publish_status, ProgressReporter};
use crate::retry::FailureTracker;
use crate::stage::{StageContext, StageError, StageExecutor, StageInputs, StageOutput, StageRegistry};

/// Pause after a failed consume call.
const CONSUME_BACKOFF: Duration = Duration::from_secs(5);

/// What happened to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The stage succeeded and the next one was enqueued
    Advanced { next_stage_index: usize },
    Completed,
    Failed,
    Cancelled,
    /// The job was terminal or had moved past the task's stage
    Stale,
    /// The task could not be processed at all
    DeadLettered,
}

/// Stage task consumer pool.
pub struct Dispatcher {
    config: WorkerConfig,
    repo: Arc<dyn JobRepository>,
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn AssetStore>,
    registry: StageRegistry,
    publisher: Option<Arc<dyn ProgressPublisher>>,
    repo_retry: RetryConfig,
    scratch_root: PathBuf,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl Dispatcher {
    pub fn new(
        config: WorkerConfig,
        repo: Arc<dyn JobRepository>,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn AssetStore>,
        registry: StageRegistry,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            repo,
            queue,
            store,
            registry,
            publisher: None,
            repo_retry: RetryConfig::default(),
            scratch_root: std::env::temp_dir(),
            semaphore,
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ProgressPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_repo_retry(mut self, retry: RetryConfig) -> Self {
        self.repo_retry = retry;
        self
    }

    /// Directory under which per-attempt scratch directories are created.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Signal shutdown. In-flight tasks are given `shutdown_timeout` to finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Consume until [`Dispatcher::shutdown`] is called.
    pub async fn run(self: Arc<Self>) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            concurrency = self.config.concurrency,
            stages = ?self.registry.stages(),
            "Starting dispatcher"
        );
        self.queue.init().await?;

        let claim_task = tokio::spawn(Arc::clone(&self).claim_loop());

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(5);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping dispatcher");
                        break;
                    }
                }
                result = self.consume_once() => {
                    match result {
                        Ok(()) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Error consuming stage tasks: {}", e);
                            }
                            tokio::time::sleep(CONSUME_BACKOFF).await;
                        }
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight stages to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_idle())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout elapsed with stages still running; their tasks stay pending"
            );
        }
        info!("Dispatcher stopped");
        Ok(())
    }

    async fn consume_once(self: &Arc<Self>) -> WorkerResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .consume(&self.consumer_name, self.config.consume_block, available)
            .await?;
        if !deliveries.is_empty() {
            debug!("Consumed {} stage tasks", deliveries.len());
        }
        for delivery in deliveries {
            self.spawn_delivery(delivery).await?;
        }
        Ok(())
    }

    /// Periodically take over tasks whose consumer died mid-stage.
    async fn claim_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.claim_interval);
        let mut failures = FailureTracker::new(3);
        loop {
            interval.tick().await;
            let count = self.semaphore.available_permits();
            if count == 0 {
                continue;
            }
            match self
                .queue
                .claim_pending(&self.consumer_name, self.config.claim_min_idle, count)
                .await
            {
                Ok(claimed) => {
                    failures.record_success();
                    if !claimed.is_empty() {
                        info!("Claimed {} pending stage tasks", claimed.len());
                    }
                    for delivery in claimed {
                        if self.spawn_delivery(delivery).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!("Failed to claim pending stage tasks: {}", e);
                    }
                }
            }
        }
    }

    async fn spawn_delivery(self: &Arc<Self>, delivery: Delivery) -> WorkerResult<()> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::config_error("dispatcher semaphore closed"))?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = this.handle_delivery(&delivery).await {
                error!(
                    job_id = %delivery.task.job_id,
                    stage_index = delivery.task.stage_index,
                    message_id = %delivery.message_id,
                    "Stage task left pending after infrastructure error: {}",
                    e
                );
            }
        });
        Ok(())
    }

    async fn wait_for_idle(&self) {
        while self.semaphore.available_permits() < self.config.concurrency {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Process one delivery to completion.
    ///
    /// The delivery is acknowledged unless an `Err` is returned, in which case
    /// it stays pending for redelivery.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> WorkerResult<DeliveryOutcome> {
        let task = &delivery.task;
        let job = match self.repo.get(&task.job_id).await {
            Ok(job) => job,
            Err(RepoError::NotFound(_)) => {
                warn!(job_id = %task.job_id, "Stage task for unknown job");
                self.queue.dead_letter(delivery, "job not found").await?;
                return Ok(DeliveryOutcome::DeadLettered);
            }
            Err(e) => return Err(e.into()),
        };

        if job.is_terminal() {
            debug!(job_id = %job.id, status = %job.status, "Dropping task for terminal job");
            metrics::record_stale_task();
            self.queue.ack(&delivery.message_id).await?;
            return Ok(DeliveryOutcome::Stale);
        }

        if job.stage_index != task.stage_index {
            // Someone else advanced the job. Make sure its current stage is
            // queued; the queue drops the duplicate if it already is.
            debug!(
                job_id = %job.id,
                task_stage = task.stage_index,
                job_stage = job.stage_index,
                "Dropping stale stage task"
            );
            metrics::record_stale_task();
            self.queue.enqueue(&StageTask::new(job.id.clone(), job.stage_index)).await?;
            self.queue.ack(&delivery.message_id).await?;
            return Ok(DeliveryOutcome::Stale);
        }

        if job.cancel_requested {
            let outcome = self.cancel_job(&job).await?;
            self.queue.ack(&delivery.message_id).await?;
            return Ok(outcome);
        }

        let (outcome, lease_held) = self.with_lease(delivery, self.run_stage(job)).await;
        let outcome = outcome?;
        if lease_held {
            self.queue.ack(&delivery.message_id).await?;
        } else {
            warn!(
                job_id = %task.job_id,
                message_id = %delivery.message_id,
                "Delivery was claimed by another consumer mid-stage; leaving it to the new owner"
            );
        }
        Ok(outcome)
    }

    /// Drive `work` while refreshing the delivery's lease. The flag reports
    /// whether this consumer still held the delivery at the last refresh.
    async fn with_lease<T>(&self, delivery: &Delivery, work: impl Future<Output = T>) -> (T, bool) {
        let period = self.config.lease_heartbeat();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut held = true;
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return (output, held),
                _ = heartbeat.tick() => {
                    match self.queue.touch(&self.consumer_name, &delivery.message_id).await {
                        Ok(owned) => held = owned,
                        Err(e) => warn!(
                            message_id = %delivery.message_id,
                            "Failed to refresh delivery lease: {}",
                            e
                        ),
                    }
                }
            }
        }
    }

    /// Run the job's current stage, retrying transient failures in place.
    async fn run_stage(&self, job: Job) -> WorkerResult<DeliveryOutcome> {
        let stage_index = job.stage_index;
        let Some(stage) = job.current_stage() else {
            return Ok(DeliveryOutcome::Stale);
        };

        let Some(executor) = self.registry.get(stage) else {
            let err = StageError::permanent(format!("no executor registered for stage {stage}"));
            return self.fail_job(&job, stage, &err).await;
        };

        loop {
            let begun = with_retry(&self.repo_retry, "begin_attempt", || {
                self.repo.begin_attempt(&job.id, stage_index)
            })
            .await;
            let job = match begun {
                Ok(job) => job,
                Err(e) if e.is_transition_rejected() => {
                    debug!(job_id = %job.id, "Job moved on before the attempt began: {}", e);
                    return Ok(DeliveryOutcome::Stale);
                }
                Err(e) => return Err(e.into()),
            };
            let attempt = job.attempt;

            let started = Instant::now();
            let result = self.execute_attempt(&job, stage, executor.as_ref()).await;
            let elapsed = started.elapsed().as_secs_f64();

            match result {
                Ok(output) => {
                    metrics::record_stage_attempt(stage, "ok", elapsed);
                    return self.complete_stage(&job, stage, output).await;
                }
                Err(StageError::Cancelled) => {
                    metrics::record_stage_attempt(stage, "cancelled", elapsed);
                    return self.cancel_job(&job).await;
                }
                Err(e) if e.is_retryable() && self.config.retry.allows_retry(attempt) => {
                    metrics::record_stage_attempt(stage, "transient", elapsed);
                    metrics::record_stage_retry(stage);
                    let delay = self.config.retry.delay(attempt);
                    warn!(
                        job_id = %job.id,
                        stage = %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Stage failed transiently, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    metrics::record_stage_attempt(stage, e.kind().as_str(), elapsed);
                    return self.fail_job(&job, stage, &e).await;
                }
            }
        }
    }

    /// One attempt: scratch space, inputs, then the executor under the stage
    /// timeout.
    async fn execute_attempt(
        &self,
        job: &Job,
        stage: StageName,
        executor: &dyn StageExecutor,
    ) -> Result<StageOutput, StageError> {
        let cancel = CancellationToken::new(job.id.clone(), Arc::clone(&self.repo), self.config.cancel_poll);
        cancel.checkpoint().await?;

        tokio::fs::create_dir_all(&self.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_root)?;

        let mut assets = Vec::new();
        if executor.needs_inputs() {
            for id in &job.input_asset_ids {
                assets.push(self.store.materialize(id).await?);
            }
        }
        let mut previous = Vec::with_capacity(job.output_asset_ids.len());
        for id in &job.output_asset_ids {
            previous.push(self.store.metadata(id).await?);
        }
        let inputs = StageInputs::new(assets, previous, Arc::clone(&self.store));

        let progress = Arc::new(ProgressReporter::new(job, Arc::clone(&self.repo), self.publisher.clone()));
        let ctx = StageContext::new(
            job.clone(),
            stage,
            cancel,
            progress,
            Arc::clone(&self.store),
            scratch.path().to_path_buf(),
        );

        let span = ctx.logger.create_span();
        async {
            ctx.logger.log_start(&format!("Running stage {}/{}", job.stage_index + 1, job.total_stages()));
            let result = match tokio::time::timeout(self.config.stage_timeout, executor.execute(&ctx, inputs)).await {
                Ok(result) => result,
                Err(_) => Err(StageError::transient(format!(
                    "stage timed out after {}s",
                    self.config.stage_timeout.as_secs()
                ))),
            };
            match &result {
                Ok(output) => {
                    for warning in &output.warnings {
                        ctx.logger.log_warning(warning);
                        ctx.progress.message(warning.clone()).await;
                    }
                    ctx.logger.log_completion(&format!("{} output(s)", output.assets.len()));
                }
                Err(e) => ctx.logger.log_error(&e.to_string()),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn complete_stage(&self, job: &Job, stage: StageName, output: StageOutput) -> WorkerResult<DeliveryOutcome> {
        let result = StageResult::new(output.assets.iter().map(|a| a.id.clone()).collect());
        let advanced = with_retry(&self.repo_retry, "advance", || {
            self.repo.advance(&job.id, job.stage_index, result.clone())
        })
        .await;
        let advanced = match advanced {
            Ok(job) => job,
            Err(e) if e.is_transition_rejected() => {
                // Another consumer recorded this stage first; our outputs are
                // orphans for the retention sweep.
                warn!(job_id = %job.id, stage = %stage, "Stage result rejected: {}", e);
                return Ok(DeliveryOutcome::Stale);
            }
            Err(e) => return Err(e.into()),
        };

        if advanced.status == JobStatus::Completed {
            info!(job_id = %advanced.id, "Job completed");
            metrics::record_job_finished(JobStatus::Completed);
            publish_status(self.publisher.as_ref(), &advanced, None).await;
            return Ok(DeliveryOutcome::Completed);
        }

        if advanced.cancel_requested {
            return self.cancel_job(&advanced).await;
        }

        let next = StageTask::new(advanced.id.clone(), advanced.stage_index);
        self.queue.enqueue(&next).await?;
        publish_status(self.publisher.as_ref(), &advanced, None).await;
        Ok(DeliveryOutcome::Advanced {
            next_stage_index: advanced.stage_index,
        })
    }

    async fn cancel_job(&self, job: &Job) -> WorkerResult<DeliveryOutcome> {
        match self.repo.cancel(&job.id).await {
            Ok(cancelled) => {
                info!(job_id = %job.id, stage_index = job.stage_index, "Job cancelled");
                metrics::record_job_finished(JobStatus::Cancelled);
                publish_status(self.publisher.as_ref(), &cancelled, Some("cancelled".to_string())).await;
                Ok(DeliveryOutcome::Cancelled)
            }
            Err(RepoError::Terminal(_)) => Ok(DeliveryOutcome::Stale),
            Err(e) => Err(e.into()),
        }
    }

    async fn fail_job(&self, job: &Job, stage: StageName, err: &StageError) -> WorkerResult<DeliveryOutcome> {
        let error = JobError::new(Some(stage), err.kind(), err.to_string());
        let failed = with_retry(&self.repo_retry, "fail", || {
            self.repo.fail(&job.id, job.stage_index, error.clone())
        })
        .await;
        match failed {
            Ok(failed) => {
                error!(job_id = %job.id, stage = %stage, kind = %err.kind(), "Job failed: {}", err);
                metrics::record_job_finished(JobStatus::Failed);
                publish_status(self.publisher.as_ref(), &failed, Some(err.to_string())).await;
                Ok(DeliveryOutcome::Failed)
            }
            Err(e) if e.is_transition_rejected() => Ok(DeliveryOutcome::Stale),
            Err(e) => Err(e.into()),
        }
    }

    /// Handle everything currently queued, one delivery at a time, until the
    /// queue is empty. Used by tests and one-shot runs.
    pub async fn drain(&self) -> WorkerResult<Vec<DeliveryOutcome>> {
        self.queue.init().await?;
        let mut outcomes = Vec::new();
        loop {
            let deliveries = self.queue.consume(&self.consumer_name, Duration::ZERO, 1).await?;
            if deliveries.is_empty() {
                return Ok(outcomes);
            }
            for delivery in deliveries {
                outcomes.push(self.handle_delivery(&delivery).await?);
            }
        }
    }
}
