//! style-render: burn styled karaoke subtitles into the video.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reframe_media::{group_words, subtitles, to_ass_karaoke, MediaToolkit, SubtitleLine, SubtitleRenderer};
use reframe_models::{AssetKind, CaptionsOptions, StageName, StyleOptions, SubtitleFormat, Transcript};
use reframe_storage::MaterializedAsset;

use super::transcribe::grouping_config;
use super::{OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput};

pub struct StyleRenderExecutor {
    toolkit: Arc<dyn MediaToolkit>,
    renderer: Arc<dyn SubtitleRenderer>,
}

impl StyleRenderExecutor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, renderer: Arc<dyn SubtitleRenderer>) -> Self {
        Self { toolkit, renderer }
    }

    /// Write the ASS file to burn, from a subtitle input when one was
    /// supplied or from the job's transcript otherwise.
    async fn prepare_subtitles(&self, ctx: &StageContext, inputs: &StageInputs) -> Result<PathBuf, StageError> {
        let supplied = inputs.assets.iter().find(|a| a.asset.kind == AssetKind::Subtitle);
        let lines = match supplied {
            Some(subtitle) => match SubtitleFormat::from_extension(subtitle.asset.extension()) {
                // Already styled; burn as is.
                Some(SubtitleFormat::Ass) => return Ok(subtitle.path().to_path_buf()),
                Some(format) => {
                    let text = read_text(subtitle).await?;
                    subtitles::parse(&text, format)?
                        .iter()
                        .map(SubtitleLine::spread_words)
                        .collect()
                }
                None => {
                    return Err(StageError::validation(format!(
                        "unsupported subtitle file .{}",
                        subtitle.asset.extension()
                    )))
                }
            },
            None => {
                let asset = inputs.require_from_stage(StageName::Transcribe, AssetKind::Json)?;
                let transcript: Transcript = inputs.read_json(asset).await?;
                let captions: CaptionsOptions = ctx.options()?;
                group_words(&transcript.spans, &grouping_config(&captions))
            }
        };

        if lines.is_empty() {
            ctx.logger.log_warning("No subtitle lines to burn");
        }
        let path = ctx.scratch_path("subtitles.ass");
        tokio::fs::write(&path, to_ass_karaoke(&lines)).await?;
        Ok(path)
    }
}

async fn read_text(asset: &MaterializedAsset) -> Result<String, StageError> {
    let bytes = tokio::fs::read(asset.path()).await?;
    String::from_utf8(bytes).map_err(|_| StageError::validation("subtitle file is not valid UTF-8"))
}

#[async_trait]
impl StageExecutor for StyleRenderExecutor {
    fn stage(&self) -> StageName {
        StageName::StyleRender
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let options: StyleOptions = ctx.options()?;
        let video = inputs
            .assets
            .iter()
            .find(|a| a.asset.kind == AssetKind::Video)
            .ok_or_else(|| StageError::validation("style-render needs a video input"))?;

        let subtitle_path = self.prepare_subtitles(ctx, &inputs).await?;
        let info = self.toolkit.probe(video.path()).await?;
        ctx.cancel.checkpoint().await?;

        let out = ctx.scratch_path("styled.mp4");
        let duration = match options.preview_seconds {
            Some(seconds) => {
                ctx.logger.log_progress(&format!("Rendering {seconds}s preview"));
                self.renderer
                    .render_preview(video.path(), &subtitle_path, &options.style, seconds, &out)
                    .await?;
                info.duration.map(|d| d.min(f64::from(seconds)))
            }
            None => {
                let callback = info.duration.map(|total| ctx.progress.ffmpeg_callback(total));
                self.renderer
                    .burn_subtitles(video.path(), &subtitle_path, &options.style, &out, callback)
                    .await?;
                info.duration
            }
        };

        let asset = ctx
            .store_output(
                None,
                OutputArtifact::file(&out, AssetKind::Video, "video/mp4", "mp4").with_duration(duration),
            )
            .await?;
        Ok(StageOutput::new(vec![asset]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testing::{FakeToolkit, Harness};
    use reframe_media::{MediaResult, ProgressCallback};
    use reframe_models::{JobType, SubtitleStyle};
    use std::path::Path;
    use std::sync::Mutex;

    /// Records the ASS it was given.
    #[derive(Default)]
    struct CapturingRenderer {
        burned: Mutex<Vec<(String, Option<u32>)>>,
    }

    impl CapturingRenderer {
        async fn record(&self, subtitle: &Path, preview: Option<u32>, out: &Path) -> MediaResult<()> {
            let ass = tokio::fs::read_to_string(subtitle).await?;
            self.burned.lock().unwrap().push((ass, preview));
            tokio::fs::write(out, b"styled").await?;
            Ok(())
        }
    }

    #[async_trait]
    impl SubtitleRenderer for CapturingRenderer {
        async fn burn_subtitles(
            &self,
            _video: &Path,
            subtitle: &Path,
            _style: &SubtitleStyle,
            out: &Path,
            _progress: Option<ProgressCallback>,
        ) -> MediaResult<()> {
            self.record(subtitle, None, out).await
        }

        async fn render_preview(
            &self,
            _video: &Path,
            subtitle: &Path,
            _style: &SubtitleStyle,
            seconds: u32,
            out: &Path,
        ) -> MediaResult<()> {
            self.record(subtitle, Some(seconds), out).await
        }
    }

    const SRT: &str = "1\n00:00:01,000 --> 00:00:03,000\nhello brave world\n";

    #[tokio::test]
    async fn test_supplied_srt_becomes_karaoke() {
        let h = Harness::new();
        let video = h.upload(b"video", AssetKind::Video, "video/mp4").await;
        let srt = h.upload(SRT.as_bytes(), AssetKind::Subtitle, "application/x-subrip").await;
        let job = h.job(JobType::StyleRender, vec![video, srt], serde_json::json!({})).await;

        let renderer = Arc::new(CapturingRenderer::default());
        let executor = StyleRenderExecutor::new(Arc::new(FakeToolkit::new(20.0)), renderer.clone());
        let ctx = h.context(&job, StageName::StyleRender);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        assert_eq!(output.assets[0].kind, AssetKind::Video);
        assert_eq!(output.assets[0].duration, Some(20.0));
        let burned = renderer.burned.lock().unwrap();
        assert_eq!(burned.len(), 1);
        assert!(burned[0].0.contains("{\\k"), "expected karaoke tags: {}", burned[0].0);
        assert!(burned[0].0.contains("brave"));
        assert_eq!(burned[0].1, None);
    }

    #[tokio::test]
    async fn test_preview_is_clipped() {
        let h = Harness::new();
        let video = h.upload(b"video", AssetKind::Video, "video/mp4").await;
        let srt = h.upload(SRT.as_bytes(), AssetKind::Subtitle, "application/x-subrip").await;
        let job = h
            .job(JobType::StyleRender, vec![video, srt], serde_json::json!({"preview_seconds": 5}))
            .await;

        let renderer = Arc::new(CapturingRenderer::default());
        let executor = StyleRenderExecutor::new(Arc::new(FakeToolkit::new(20.0)), renderer.clone());
        let ctx = h.context(&job, StageName::StyleRender);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        assert_eq!(output.assets[0].duration, Some(5.0));
        assert_eq!(renderer.burned.lock().unwrap()[0].1, Some(5));
    }
}
