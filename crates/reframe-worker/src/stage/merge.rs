//! merge-audio-video: lay an audio track over a video.

use std::sync::Arc;

use async_trait::async_trait;
use reframe_media::MediaToolkit;
use reframe_models::{AssetKind, MergeOptions, StageName};
use reframe_storage::MaterializedAsset;

use super::{probed_duration, OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput};

pub struct MergeExecutor {
    toolkit: Arc<dyn MediaToolkit>,
}

impl MergeExecutor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }
}

fn pick<'a>(inputs: &'a StageInputs, kind: AssetKind) -> Result<&'a MaterializedAsset, StageError> {
    inputs
        .assets
        .iter()
        .find(|a| a.asset.kind == kind)
        .ok_or_else(|| StageError::validation(format!("merge needs a {kind} input")))
}

#[async_trait]
impl StageExecutor for MergeExecutor {
    fn stage(&self) -> StageName {
        StageName::MergeAudioVideo
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let options: MergeOptions = ctx.options()?;
        let video = pick(&inputs, AssetKind::Video)?;
        let audio = pick(&inputs, AssetKind::Audio)?;

        let info = self.toolkit.probe(video.path()).await?;
        if !info.has_video() {
            return Err(StageError::validation("video input has no video stream"));
        }
        ctx.cancel.checkpoint().await?;

        let out = ctx.scratch_path("merged.mp4");
        self.toolkit
            .merge_audio_video(video.path(), audio.path(), &options, &out)
            .await?;
        ctx.progress.report(0.9).await;

        let duration = probed_duration(self.toolkit.as_ref(), &out).await.or(info.duration);
        let asset = ctx
            .store_output(
                None,
                OutputArtifact::file(&out, AssetKind::Video, "video/mp4", "mp4").with_duration(duration),
            )
            .await?;
        Ok(StageOutput::new(vec![asset]))
    }
}
