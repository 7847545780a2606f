//! extract-audio: pull a speech-ready WAV track out of the source video.

use std::sync::Arc;

use async_trait::async_trait;
use reframe_media::MediaToolkit;
use reframe_models::{AssetKind, StageName};

use super::{probed_duration, OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput};

pub struct ExtractAudioExecutor {
    toolkit: Arc<dyn MediaToolkit>,
}

impl ExtractAudioExecutor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }
}

#[async_trait]
impl StageExecutor for ExtractAudioExecutor {
    fn stage(&self) -> StageName {
        StageName::ExtractAudio
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let video = inputs.input(0)?;
        if video.asset.kind != AssetKind::Video {
            return Err(StageError::validation(format!(
                "extract-audio needs a video input, got {}",
                video.asset.kind
            )));
        }

        let info = self.toolkit.probe(video.path()).await?;
        if !info.has_audio() {
            return Err(StageError::validation("input video has no audio track"));
        }
        ctx.cancel.checkpoint().await?;

        let out = ctx.scratch_path("audio.wav");
        self.toolkit.extract_audio(video.path(), &out).await?;
        ctx.progress.report(0.9).await;

        let duration = probed_duration(self.toolkit.as_ref(), &out).await.or(info.duration);
        let asset = ctx
            .store_output(
                None,
                OutputArtifact::file(&out, AssetKind::Audio, "audio/wav", "wav").with_duration(duration),
            )
            .await?;
        ctx.logger.log_progress(&format!("Extracted audio track {}", asset.id));
        Ok(StageOutput::new(vec![asset]))
    }
}
