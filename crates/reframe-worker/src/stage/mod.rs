//! Pipeline stage executors.
//!
//! One [`StageExecutor`] exists per [`StageName`]. The dispatcher builds a
//! [`StageContext`] and [`StageInputs`] for each attempt; executors write
//! their outputs through [`StageContext::store_output`], which derives the
//! storage key from `(job, stage, attempt)` so a retried attempt can never
//! overwrite or duplicate an earlier one.

mod cut_clip;
mod error;
mod extract_audio;
mod merge;
mod segment_select;
mod style_render;
mod transcribe;
mod translate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reframe_media::{EngineConfig, FfmpegRunner, FfmpegSubtitleRenderer, FfmpegToolkit, MediaToolkit, SubtitleRenderer};
use reframe_models::{
    parse_options, AssetKind, Job, JobConfig, MediaAsset, StageName,
};
use reframe_storage::{stage_output_key, AssetStore, MaterializedAsset, PutRequest, PutSource};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::cancel::CancellationToken;
use crate::logging::JobLogger;
use crate::progress::ProgressReporter;
use crate::selector::SelectorConfig;

pub use cut_clip::CutClipExecutor;
pub use error::StageError;
pub use extract_audio::ExtractAudioExecutor;
pub use merge::MergeExecutor;
pub use segment_select::SegmentSelectExecutor;
pub use style_render::StyleRenderExecutor;
pub use transcribe::TranscribeExecutor;
pub use translate::TranslateExecutor;

/// Everything an executor knows about the attempt it runs.
pub struct StageContext {
    pub job: Job,
    pub stage: StageName,
    pub attempt: u32,
    pub cancel: CancellationToken,
    pub progress: Arc<ProgressReporter>,
    pub logger: JobLogger,
    store: Arc<dyn AssetStore>,
    scratch: PathBuf,
}

impl StageContext {
    pub fn new(
        job: Job,
        stage: StageName,
        cancel: CancellationToken,
        progress: Arc<ProgressReporter>,
        store: Arc<dyn AssetStore>,
        scratch: PathBuf,
    ) -> Self {
        let attempt = job.attempt;
        let logger = JobLogger::new(&job.id, stage, attempt);
        Self {
            job,
            stage,
            attempt,
            cancel,
            progress,
            logger,
            store,
            scratch,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.job.config
    }

    /// Parse this stage's typed options from the job config.
    pub fn options<T>(&self) -> Result<T, StageError>
    where
        T: DeserializeOwned + Validate,
    {
        Ok(parse_options(&self.job.config)?)
    }

    /// Private directory for this attempt's intermediate files.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.scratch.join(name)
    }

    /// Register an output under its deterministic key.
    ///
    /// Stages with several outputs pass distinct indexes; a stage with one
    /// output passes `None`.
    pub async fn store_output(
        &self,
        index: Option<usize>,
        artifact: OutputArtifact,
    ) -> Result<MediaAsset, StageError> {
        let key = stage_output_key(&self.job.id, self.stage, self.attempt, index, &artifact.extension);
        let request = PutRequest {
            source: artifact.source,
            kind: artifact.kind,
            mime_type: artifact.mime_type,
            key: Some(key),
            duration: artifact.duration,
        };
        Ok(self.store.put(request).await?)
    }
}

/// A produced file or buffer, not yet registered.
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    pub source: PutSource,
    pub kind: AssetKind,
    pub mime_type: String,
    pub extension: String,
    pub duration: Option<f64>,
}

impl OutputArtifact {
    pub fn file(path: impl Into<PathBuf>, kind: AssetKind, mime_type: &str, extension: &str) -> Self {
        Self {
            source: PutSource::File(path.into()),
            kind,
            mime_type: mime_type.to_string(),
            extension: extension.to_string(),
            duration: None,
        }
    }

    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, StageError> {
        Ok(Self {
            source: PutSource::Bytes(serde_json::to_vec_pretty(value)?),
            kind: AssetKind::Json,
            mime_type: "application/json".to_string(),
            extension: "json".to_string(),
            duration: None,
        })
    }

    pub fn text(text: String, kind: AssetKind, mime_type: &str, extension: &str) -> Self {
        Self {
            source: PutSource::Bytes(text.into_bytes()),
            kind,
            mime_type: mime_type.to_string(),
            extension: extension.to_string(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }
}

/// Input assets of the job and outputs of earlier stages.
pub struct StageInputs {
    /// Job inputs in creation order; empty for stages that only read
    /// earlier outputs
    pub assets: Vec<MaterializedAsset>,
    /// Outputs recorded by earlier stages, in order
    pub previous: Vec<MediaAsset>,
    store: Arc<dyn AssetStore>,
}

impl StageInputs {
    pub fn new(
        assets: Vec<MaterializedAsset>,
        previous: Vec<MediaAsset>,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        Self {
            assets,
            previous,
            store,
        }
    }

    /// The `index`-th job input.
    pub fn input(&self, index: usize) -> Result<&MaterializedAsset, StageError> {
        self.assets
            .get(index)
            .ok_or_else(|| StageError::validation(format!("missing input asset #{}", index + 1)))
    }

    /// Last output of `stage` with the given kind.
    pub fn from_stage(&self, stage: StageName, kind: AssetKind) -> Option<&MediaAsset> {
        let marker = format!("/{}/", stage.as_str());
        self.previous
            .iter()
            .rev()
            .find(|a| a.kind == kind && a.key.contains(&marker))
    }

    /// Like [`StageInputs::from_stage`], failing when the output is absent.
    pub fn require_from_stage(
        &self,
        stage: StageName,
        kind: AssetKind,
    ) -> Result<&MediaAsset, StageError> {
        self.from_stage(stage, kind).ok_or_else(|| {
            StageError::validation(format!("no {} output from the {} stage", kind, stage))
        })
    }

    pub async fn read_json<T: DeserializeOwned>(&self, asset: &MediaAsset) -> Result<T, StageError> {
        let bytes = self.store.read(&asset.id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn materialize(&self, asset: &MediaAsset) -> Result<MaterializedAsset, StageError> {
        Ok(self.store.materialize(&asset.id).await?)
    }
}

/// Result of a successful stage attempt.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Registered outputs, in the order they should be recorded
    pub assets: Vec<MediaAsset>,
    /// Non-fatal issues, such as an engine fallback
    pub warnings: Vec<String>,
}

impl StageOutput {
    pub fn new(assets: Vec<MediaAsset>) -> Self {
        Self {
            assets,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// One pipeline step.
///
/// Executors must be idempotent for the same `(job, stage, attempt, config)`.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> StageName;

    /// Whether the dispatcher should materialize the job's input assets
    /// before calling [`StageExecutor::execute`].
    fn needs_inputs(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError>;
}

/// Engines shared by the built-in executors.
#[derive(Clone)]
pub struct Collaborators {
    pub toolkit: Arc<dyn MediaToolkit>,
    pub renderer: Arc<dyn SubtitleRenderer>,
    pub engines: EngineConfig,
    pub selector: SelectorConfig,
}

impl Collaborators {
    /// ffmpeg-backed collaborators; engine calls share `engines.engine_timeout`.
    pub fn ffmpeg(engines: EngineConfig, selector: SelectorConfig) -> Self {
        let runner = FfmpegRunner::new().with_timeout(engines.engine_timeout);
        Self {
            toolkit: Arc::new(FfmpegToolkit::new(runner.clone())),
            renderer: Arc::new(FfmpegSubtitleRenderer::new(runner)),
            engines,
            selector,
        }
    }
}

/// Executors by stage.
#[derive(Clone, Default)]
pub struct StageRegistry {
    executors: HashMap<StageName, Arc<dyn StageExecutor>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in executor.
    pub fn with_defaults(collaborators: &Collaborators) -> Self {
        let c = collaborators;
        Self::new()
            .register(ExtractAudioExecutor::new(c.toolkit.clone()))
            .register(TranscribeExecutor::new(c.toolkit.clone(), c.engines.clone()))
            .register(SegmentSelectExecutor::new(c.selector.clone()))
            .register(StyleRenderExecutor::new(c.toolkit.clone(), c.renderer.clone()))
            .register(TranslateExecutor::new(c.engines.clone()))
            .register(MergeExecutor::new(c.toolkit.clone()))
            .register(CutClipExecutor::new(c.toolkit.clone()))
    }

    /// Add or replace the executor for its stage.
    pub fn register(mut self, executor: impl StageExecutor + 'static) -> Self {
        self.executors.insert(executor.stage(), Arc::new(executor));
        self
    }

    pub fn register_arc(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(executor.stage(), executor);
        self
    }

    pub fn get(&self, stage: StageName) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }

    pub fn stages(&self) -> Vec<StageName> {
        StageName::ALL
            .into_iter()
            .filter(|s| self.executors.contains_key(s))
            .collect()
    }
}

/// Duration of a produced media file, when it can be probed.
pub(crate) async fn probed_duration(toolkit: &dyn MediaToolkit, path: &Path) -> Option<f64> {
    toolkit.probe(path).await.ok().and_then(|info| info.duration)
}
