//! transcribe: run ASR on the extracted audio and write the transcript plus
//! one subtitle file per requested format.

use std::sync::Arc;

use async_trait::async_trait;
use reframe_media::{
    build_recognizer, group_words, subtitles, EngineConfig, GroupingConfig, MediaToolkit, SpeechRecognizer,
    TranscribeConfig,
};
use reframe_models::{AssetKind, CaptionsOptions, StageName, Transcript};

use super::{OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput};

pub struct TranscribeExecutor {
    toolkit: Arc<dyn MediaToolkit>,
    engines: EngineConfig,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
}

impl TranscribeExecutor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, engines: EngineConfig) -> Self {
        Self {
            toolkit,
            engines,
            recognizer: None,
        }
    }

    /// Always use `recognizer`, ignoring the configured backend.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }
}

pub(super) fn grouping_config(options: &CaptionsOptions) -> GroupingConfig {
    let defaults = GroupingConfig::default();
    GroupingConfig {
        max_chars_per_line: options.max_chars_per_line.unwrap_or(defaults.max_chars_per_line),
        max_words_per_line: options.max_words_per_line.unwrap_or(defaults.max_words_per_line),
        max_duration: options.max_line_duration.unwrap_or(defaults.max_duration),
        max_gap: options.max_gap.unwrap_or(defaults.max_gap),
    }
}

#[async_trait]
impl StageExecutor for TranscribeExecutor {
    fn stage(&self) -> StageName {
        StageName::Transcribe
    }

    fn needs_inputs(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let options: CaptionsOptions = ctx.options()?;
        let audio_asset = inputs.require_from_stage(StageName::ExtractAudio, AssetKind::Audio)?;
        let audio = inputs.materialize(audio_asset).await?;

        let mut warnings = Vec::new();
        let recognizer: Arc<dyn SpeechRecognizer> = match &self.recognizer {
            Some(recognizer) => recognizer.clone(),
            None => {
                let backend = options.backend.unwrap_or(self.engines.asr_backend);
                let (recognizer, fallback) = build_recognizer(backend, &self.engines);
                if let Some(reason) = fallback {
                    ctx.logger.log_warning(&reason);
                    warnings.push(reason);
                }
                Arc::from(recognizer)
            }
        };

        let duration_hint = match audio_asset.duration {
            Some(d) => Some(d),
            None => self.toolkit.probe(audio.path()).await.ok().and_then(|i| i.duration),
        };
        let config = TranscribeConfig {
            language: options.language.clone(),
            model: options.model.clone(),
            word_timestamps: options.word_timestamps,
            duration_hint,
        };

        ctx.cancel.checkpoint().await?;
        ctx.progress.message(format!("Transcribing with {}", recognizer.backend().as_str())).await;
        let mut transcript: Transcript = recognizer.transcribe(audio.path(), &config).await?;
        ctx.progress.report(0.8).await;
        ctx.cancel.checkpoint().await?;

        transcript.warnings.extend(warnings.iter().cloned());
        if transcript.spans.is_empty() {
            ctx.logger.log_warning("Transcript is empty");
        }

        let lines = group_words(&transcript.spans, &grouping_config(&options));
        let mut assets = Vec::with_capacity(options.formats.len() + 1);
        assets.push(ctx.store_output(Some(0), OutputArtifact::json(&transcript)?).await?);
        for (i, format) in options.formats.iter().enumerate() {
            let text = subtitles::render(&lines, *format);
            let artifact = OutputArtifact::text(text, AssetKind::Subtitle, format.mime(), format.extension())
                .with_duration(Some(transcript.duration()));
            assets.push(ctx.store_output(Some(i + 1), artifact).await?);
        }

        ctx.logger.log_progress(&format!(
            "Transcribed {} spans into {} lines",
            transcript.spans.len(),
            lines.len()
        ));
        Ok(StageOutput::new(assets).with_warnings(warnings))
    }
}
