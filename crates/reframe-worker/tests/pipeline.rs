//! End-to-end dispatcher tests over the memory repository, memory queue and
//! a local asset store, with scripted executors standing in for engines.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reframe_jobs::{JobRepository, JobService, MemoryJobRepository, RetryConfig};
use reframe_models::{
    AssetId, AssetKind, JobId, JobStatus, JobType, NewJob, SegmentSelection, StageName, Transcript,
    TranscriptSpan,
};
use reframe_queue::{
    MemoryTaskQueue, ProgressEvent, ProgressPublisher, QueueResult, StageTask, TaskQueue,
};
use reframe_storage::{AssetStore, LocalAssetStore};
use reframe_worker::stage::SegmentSelectExecutor;
use reframe_worker::{
    DeliveryOutcome, Dispatcher, OutputArtifact, RetryPolicy, SelectorConfig, StageContext,
    StageError, StageExecutor, StageInputs, StageOutput, StageRegistry, WorkerConfig,
};
use tempfile::TempDir;
use tokio::sync::Barrier;

/// Executor that records its calls, optionally failing transiently first.
struct Scripted {
    stage: StageName,
    calls: AtomicU32,
    transient_failures: u32,
    progress: Vec<f64>,
}

impl Scripted {
    fn new(stage: StageName) -> Arc<Self> {
        Self::flaky(stage, 0)
    }

    fn flaky(stage: StageName, transient_failures: u32) -> Arc<Self> {
        Arc::new(Self {
            stage,
            calls: AtomicU32::new(0),
            transient_failures,
            progress: Vec::new(),
        })
    }

    fn reporting(stage: StageName, progress: Vec<f64>) -> Arc<Self> {
        Arc::new(Self {
            stage,
            calls: AtomicU32::new(0),
            transient_failures: 0,
            progress,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageExecutor for Scripted {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, ctx: &StageContext, _inputs: StageInputs) -> Result<StageOutput, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        for fraction in &self.progress {
            ctx.progress.report(*fraction).await;
        }
        // Written before failing, so failed attempts leave stray objects
        // behind exactly like a crashed engine would.
        let artifact = OutputArtifact::json(&serde_json::json!({
            "stage": self.stage.as_str(),
            "attempt": ctx.attempt,
        }))?;
        let asset = ctx.store_output(None, artifact).await?;
        if call <= self.transient_failures {
            return Err(StageError::transient(format!("engine unavailable (call {call})")));
        }
        Ok(StageOutput::new(vec![asset]))
    }
}

/// Sleeps through every call, recording how many calls overlap.
struct Slow {
    stage: StageName,
    first_delay: Duration,
    delay: Duration,
    transient_failures: u32,
    calls: AtomicU32,
    running: AtomicU32,
    max_running: AtomicU32,
}

impl Slow {
    fn new(stage: StageName, delay: Duration, transient_failures: u32) -> Arc<Self> {
        Self::build(stage, delay, delay, transient_failures)
    }

    /// Stalls for `first_delay` on the first call only.
    fn stalling(stage: StageName, first_delay: Duration) -> Arc<Self> {
        Self::build(stage, first_delay, Duration::ZERO, 0)
    }

    fn build(stage: StageName, first_delay: Duration, delay: Duration, transient_failures: u32) -> Arc<Self> {
        Arc::new(Self {
            stage,
            first_delay,
            delay,
            transient_failures,
            calls: AtomicU32::new(0),
            running: AtomicU32::new(0),
            max_running: AtomicU32::new(0),
        })
    }
}

/// Decrements the running count even when the call is dropped by a timeout.
struct RunningGuard<'a>(&'a AtomicU32);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StageExecutor for Slow {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, ctx: &StageContext, _inputs: StageInputs) -> Result<StageOutput, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let delay = if call == 1 { self.first_delay } else { self.delay };
        tokio::time::sleep(delay).await;
        if call <= self.transient_failures {
            return Err(StageError::transient(format!("engine busy (call {call})")));
        }
        let artifact = OutputArtifact::json(&serde_json::json!({ "attempt": ctx.attempt }))?;
        Ok(StageOutput::new(vec![ctx.store_output(None, artifact).await?]))
    }
}

/// Holds every call until `parties` calls are in flight at once.
struct Rendezvous {
    barrier: Barrier,
    calls: AtomicU32,
}

#[async_trait]
impl StageExecutor for Rendezvous {
    fn stage(&self) -> StageName {
        StageName::Translate
    }

    async fn execute(&self, ctx: &StageContext, _inputs: StageInputs) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.barrier.wait().await;
        let artifact = OutputArtifact::json(&serde_json::json!({ "attempt": ctx.attempt }))?;
        Ok(StageOutput::new(vec![ctx.store_output(None, artifact).await?]))
    }
}

/// Emits a fixed transcript for the selector to work on.
struct FixedTranscript(Vec<TranscriptSpan>);

#[async_trait]
impl StageExecutor for FixedTranscript {
    fn stage(&self) -> StageName {
        StageName::Transcribe
    }

    fn needs_inputs(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StageContext, _inputs: StageInputs) -> Result<StageOutput, StageError> {
        let transcript = Transcript {
            spans: self.0.clone(),
            backend: "fixed".to_string(),
            ..Transcript::default()
        };
        let asset = ctx.store_output(Some(0), OutputArtifact::json(&transcript)?).await?;
        Ok(StageOutput::new(vec![asset]))
    }
}

/// Captures the selection handed to the cut stage.
#[derive(Default)]
struct CaptureSelection(Mutex<Option<SegmentSelection>>);

#[async_trait]
impl StageExecutor for CaptureSelection {
    fn stage(&self) -> StageName {
        StageName::CutClip
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let asset = inputs.require_from_stage(StageName::SegmentSelect, AssetKind::Json)?;
        let selection: SegmentSelection = inputs.read_json(asset).await?;
        let mut outputs = Vec::new();
        for (i, clip) in selection.clips.iter().enumerate() {
            let artifact = OutputArtifact::text(clip.clip_id.clone(), AssetKind::Video, "video/mp4", "mp4");
            outputs.push(ctx.store_output(Some(i), artifact).await?);
        }
        *self.0.lock().unwrap() = Some(selection);
        Ok(StageOutput::new(outputs))
    }
}

#[derive(Default)]
struct RecordingPublisher(Mutex<Vec<ProgressEvent>>);

impl RecordingPublisher {
    fn events_for(&self, job_id: &JobId) -> Vec<ProgressEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProgressPublisher for RecordingPublisher {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Pipeline {
    dir: TempDir,
    repo: Arc<dyn JobRepository>,
    queue: Arc<MemoryTaskQueue>,
    store: Arc<dyn AssetStore>,
    service: JobService,
    events: Arc<RecordingPublisher>,
}

impl Pipeline {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let store: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(dir.path().join("media")).unwrap());
        let service = JobService::new(repo.clone(), queue.clone(), store.clone());
        Self {
            dir,
            repo,
            queue,
            store,
            service,
            events: Arc::new(RecordingPublisher::default()),
        }
    }

    fn dispatcher(&self, registry: StageRegistry) -> Dispatcher {
        self.dispatcher_with(Self::config(), registry)
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            retry: RetryPolicy::immediate(3),
            cancel_poll: Duration::ZERO,
            ..WorkerConfig::default()
        }
    }

    fn dispatcher_with(&self, config: WorkerConfig, registry: StageRegistry) -> Dispatcher {
        Dispatcher::new(config, self.repo.clone(), self.queue.clone(), self.store.clone(), registry)
            .with_publisher(self.events.clone())
            .with_repo_retry(RetryConfig::none())
            .with_scratch_root(self.dir.path().join("scratch"))
    }

    async fn upload(&self) -> AssetId {
        self.service
            .upload_asset(b"fake video".to_vec(), AssetKind::Video, None)
            .await
            .unwrap()
            .id
    }

    /// Consume and handle exactly one queued task.
    async fn step(&self, dispatcher: &Dispatcher) -> DeliveryOutcome {
        let mut batch = self.queue.consume("test", Duration::ZERO, 1).await.unwrap();
        assert_eq!(batch.len(), 1, "expected one queued task");
        let delivery = batch.remove(0);
        dispatcher.handle_delivery(&delivery).await.unwrap()
    }
}

fn translate_job(input: AssetId) -> NewJob {
    NewJob::new(JobType::Translate, vec![input]).with_config(
        serde_json::json!({"target_language": "fr"}).as_object().cloned().unwrap(),
    )
}

async fn wait_for_terminal(repo: &Arc<dyn JobRepository>, id: &JobId) -> JobStatus {
    for _ in 0..200 {
        let job = repo.get(id).await.unwrap();
        if job.is_terminal() {
            return job.status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} did not finish");
}

fn captions_registry(extract: &Arc<Scripted>, transcribe: &Arc<Scripted>) -> StageRegistry {
    StageRegistry::new()
        .register_arc(extract.clone())
        .register_arc(transcribe.clone())
}

#[tokio::test]
async fn test_dedupe_key_runs_stage_work_once() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let extract = Scripted::new(StageName::ExtractAudio);
    let transcribe = Scripted::new(StageName::Transcribe);
    let dispatcher = pipeline.dispatcher(captions_registry(&extract, &transcribe));

    let request = NewJob::new(JobType::Captions, vec![input]).with_dedupe_key("upload-42");
    let first = pipeline.service.create_job(request.clone()).await.unwrap();
    let second = pipeline.service.create_job(request).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(pipeline.queue.len().await.unwrap(), 1);

    let outcomes = dispatcher.drain().await.unwrap();
    assert_eq!(
        outcomes,
        vec![DeliveryOutcome::Advanced { next_stage_index: 1 }, DeliveryOutcome::Completed]
    );

    // Retrying the request after completion returns the finished job and
    // queues nothing.
    let third = pipeline
        .service
        .create_job(NewJob::new(JobType::Captions, first.input_asset_ids.clone()).with_dedupe_key("upload-42"))
        .await
        .unwrap();
    assert_eq!(third.id, first.id);
    assert_eq!(third.status, JobStatus::Completed);
    assert!(dispatcher.drain().await.unwrap().is_empty());

    assert_eq!(extract.calls(), 1);
    assert_eq!(transcribe.calls(), 1);
}

#[tokio::test]
async fn test_transient_failures_retry_to_a_single_output() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let translate = Scripted::flaky(StageName::Translate, 2);
    let dispatcher = pipeline.dispatcher(StageRegistry::new().register_arc(translate.clone()));

    let job = pipeline
        .service
        .create_job(NewJob::new(JobType::Translate, vec![input]).with_config(
            serde_json::json!({"target_language": "es"}).as_object().cloned().unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(dispatcher.drain().await.unwrap(), vec![DeliveryOutcome::Completed]);
    assert_eq!(translate.calls(), 3);

    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output_asset_ids.len(), 1);

    // The registered output is the one written by the successful attempt.
    let bytes = pipeline.store.read(&job.output_asset_ids[0]).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["attempt"], 3);
}

#[tokio::test]
async fn test_retries_exhausted_fails_job() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let translate = Scripted::flaky(StageName::Translate, 10);
    let dispatcher = pipeline.dispatcher(StageRegistry::new().register_arc(translate.clone()));

    let job = pipeline
        .service
        .create_job(NewJob::new(JobType::Translate, vec![input]).with_config(
            serde_json::json!({"target_language": "de"}).as_object().cloned().unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(dispatcher.drain().await.unwrap(), vec![DeliveryOutcome::Failed]);
    assert_eq!(translate.calls(), 3);

    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.stage, Some(StageName::Translate));
    assert!(error.message.contains("engine unavailable"));
    assert!(job.output_asset_ids.is_empty());
}

#[tokio::test]
async fn test_cancel_between_stages_keeps_first_output() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let extract = Scripted::new(StageName::ExtractAudio);
    let transcribe = Scripted::new(StageName::Transcribe);
    let dispatcher = pipeline.dispatcher(captions_registry(&extract, &transcribe));

    let job = pipeline
        .service
        .create_job(NewJob::new(JobType::Captions, vec![input]))
        .await
        .unwrap();

    assert_eq!(
        pipeline.step(&dispatcher).await,
        DeliveryOutcome::Advanced { next_stage_index: 1 }
    );

    let requested = pipeline.service.cancel(&job.id).await.unwrap();
    assert!(requested.cancel_requested);
    assert_eq!(requested.status, JobStatus::Running);

    assert_eq!(pipeline.step(&dispatcher).await, DeliveryOutcome::Cancelled);

    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.output_asset_ids.len(), 1);
    assert!(pipeline.store.metadata(&job.output_asset_ids[0]).await.is_ok());
    assert_eq!(extract.calls(), 1);
    assert_eq!(transcribe.calls(), 0);

    let events = pipeline.events.events_for(&job.id);
    assert_eq!(events.last().map(|e| e.status), Some(JobStatus::Cancelled));
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let extract = Scripted::reporting(StageName::ExtractAudio, vec![0.25, 0.5, 0.375, 1.0]);
    let transcribe = Scripted::reporting(StageName::Transcribe, vec![0.5, 0.25, 0.75]);
    let dispatcher = pipeline.dispatcher(captions_registry(&extract, &transcribe));

    let job = pipeline
        .service
        .create_job(NewJob::new(JobType::Captions, vec![input]))
        .await
        .unwrap();
    dispatcher.drain().await.unwrap();

    let values: Vec<f64> = pipeline
        .events
        .events_for(&job.id)
        .iter()
        .map(|e| e.progress)
        .collect();
    assert!(!values.is_empty());
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "progress regressed: {values:?}"
    );
    assert_eq!(values.last().copied(), Some(1.0));

    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 1.0);
}

#[tokio::test]
async fn test_shorts_selection_is_non_overlapping_and_bounded() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;

    // Ten minutes of five-second spans.
    let spans: Vec<TranscriptSpan> = (0..120)
        .map(|i| {
            let start = i as f64 * 5.0;
            let text = if i % 17 == 0 {
                "this launch is amazing! we love it"
            } else {
                "and then we kept talking for a while"
            };
            TranscriptSpan::new(text, start, start + 5.0)
        })
        .collect();

    let capture = Arc::new(CaptureSelection::default());
    let registry = StageRegistry::new()
        .register_arc(Scripted::new(StageName::ExtractAudio))
        .register(FixedTranscript(spans))
        .register(SegmentSelectExecutor::new(SelectorConfig::default()))
        .register_arc(capture.clone());
    let dispatcher = pipeline.dispatcher(registry);

    let config = serde_json::json!({
        "max_clips": 3,
        "min_duration": 10.0,
        "max_duration": 45.0,
        "keywords": ["launch"],
    });
    let job = pipeline
        .service
        .create_job(NewJob::new(JobType::Shorts, vec![input]).with_config(config.as_object().cloned().unwrap()))
        .await
        .unwrap();

    let outcomes = dispatcher.drain().await.unwrap();
    assert_eq!(outcomes.last(), Some(&DeliveryOutcome::Completed));

    let selection = capture.0.lock().unwrap().clone().unwrap();
    assert_eq!(selection.clips.len(), 3);
    assert!(!selection.widened);
    for clip in &selection.clips {
        let duration = clip.candidate.duration();
        assert!((10.0..=45.0).contains(&duration), "clip {} lasts {duration}s", clip.clip_id);
        assert!(clip.clip_id.starts_with(&format!("{}-clip-", job.id)));
    }
    for pair in selection.clips.windows(2) {
        assert!(pair[0].candidate.end <= pair[1].candidate.start);
    }
    // Keyword windows outscore plain ones.
    assert!(selection.clips.iter().any(|c| c.candidate.snippet.contains("launch")));

    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_task_for_unknown_job_is_dead_lettered() {
    let pipeline = Pipeline::new();
    let dispatcher = pipeline.dispatcher(StageRegistry::new());

    pipeline
        .queue
        .enqueue(&StageTask::new(JobId::from_string("no-such-job"), 0))
        .await
        .unwrap();

    assert_eq!(dispatcher.drain().await.unwrap(), vec![DeliveryOutcome::DeadLettered]);
    let dead = pipeline.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(pipeline.queue.pending_len(), 0);
}

#[tokio::test]
async fn test_missing_executor_fails_job_permanently() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let dispatcher = pipeline.dispatcher(StageRegistry::new());

    let job = pipeline
        .service
        .create_job(NewJob::new(JobType::CutClip, vec![input]).with_config(
            serde_json::json!({"start": 0.0, "end": 5.0}).as_object().cloned().unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(dispatcher.drain().await.unwrap(), vec![DeliveryOutcome::Failed]);
    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.map(|e| e.kind.as_str()), Some("permanent"));
}

#[tokio::test]
async fn test_stage_timeout_is_retried_as_transient() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let translate = Slow::stalling(StageName::Translate, Duration::from_secs(5));
    let config = WorkerConfig {
        stage_timeout: Duration::from_millis(100),
        ..Pipeline::config()
    };
    let dispatcher = pipeline.dispatcher_with(config, StageRegistry::new().register_arc(translate.clone()));

    let job = pipeline.service.create_job(translate_job(input)).await.unwrap();
    assert_eq!(dispatcher.drain().await.unwrap(), vec![DeliveryOutcome::Completed]);
    assert_eq!(translate.calls.load(Ordering::SeqCst), 2);
    assert_eq!(translate.running.load(Ordering::SeqCst), 0);

    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let bytes = pipeline.store.read(&job.output_asset_ids[0]).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["attempt"], 2);
}

#[tokio::test]
async fn test_retrying_stage_is_not_claimed_by_another_worker() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    // Three 80ms attempts outlast the 150ms claim threshold.
    let translate = Slow::new(StageName::Translate, Duration::from_millis(80), 2);
    let config = WorkerConfig {
        stage_timeout: Duration::from_millis(500),
        consume_block: Duration::from_millis(20),
        claim_interval: Duration::from_millis(20),
        claim_min_idle: Duration::from_millis(150),
        shutdown_timeout: Duration::from_secs(2),
        ..Pipeline::config()
    };
    let a = Arc::new(pipeline.dispatcher_with(config.clone(), StageRegistry::new().register_arc(translate.clone())));
    let b = Arc::new(pipeline.dispatcher_with(config, StageRegistry::new().register_arc(translate.clone())));
    let runs = [tokio::spawn(a.clone().run()), tokio::spawn(b.clone().run())];

    let job = pipeline.service.create_job(translate_job(input)).await.unwrap();
    assert_eq!(wait_for_terminal(&pipeline.repo, &job.id).await, JobStatus::Completed);

    a.shutdown();
    b.shutdown();
    for run in runs {
        run.await.unwrap().unwrap();
    }

    assert_eq!(translate.calls.load(Ordering::SeqCst), 3);
    assert_eq!(translate.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.queue.pending_len(), 0);
    assert!(pipeline.queue.dead_letters().is_empty());
    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.output_asset_ids.len(), 1);
}

#[tokio::test]
async fn test_racing_consumers_link_only_the_winning_output() {
    let pipeline = Pipeline::new();
    let input = pipeline.upload().await;
    let translate = Arc::new(Rendezvous {
        barrier: Barrier::new(2),
        calls: AtomicU32::new(0),
    });

    // A duplicate delivery of the same stage lands on a second queue.
    let job = pipeline.service.create_job(translate_job(input)).await.unwrap();
    let other_queue = Arc::new(MemoryTaskQueue::new());
    other_queue.enqueue(&StageTask::new(job.id.clone(), 0)).await.unwrap();

    let a = pipeline.dispatcher(StageRegistry::new().register_arc(translate.clone()));
    let b = Dispatcher::new(
        Pipeline::config(),
        pipeline.repo.clone(),
        other_queue.clone(),
        pipeline.store.clone(),
        StageRegistry::new().register_arc(translate.clone()),
    )
    .with_repo_retry(RetryConfig::none())
    .with_scratch_root(pipeline.dir.path().join("scratch"));

    let (from_a, from_b) = tokio::join!(a.drain(), b.drain());
    let mut outcomes = from_a.unwrap();
    outcomes.extend(from_b.unwrap());
    assert_eq!(translate.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.contains(&DeliveryOutcome::Completed));
    assert!(outcomes.contains(&DeliveryOutcome::Stale));

    let job = pipeline.repo.get(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output_asset_ids.len(), 1);

    // Both attempts wrote an object; only the winner's is linked.
    let written = pipeline.store.list(&format!("{}/", job.id)).await.unwrap();
    assert_eq!(written.len(), 2);
    let unlinked: Vec<_> = written
        .iter()
        .filter(|asset| !job.output_asset_ids.contains(&asset.id))
        .collect();
    assert_eq!(unlinked.len(), 1);

    assert_eq!(pipeline.queue.pending_len(), 0);
    assert_eq!(other_queue.pending_len(), 0);
}
