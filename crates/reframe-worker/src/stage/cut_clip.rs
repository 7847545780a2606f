//! cut-clip: cut one range from a video, or every selected shorts clip plus
//! a manifest describing them.
//!
//! Shorts outputs for clip `i` share index `i` and differ by extension:
//! `{attempt}-{i}.mp4`, `{attempt}-{i}.png` and, with subtitles on,
//! `{attempt}-{i}.vtt`. The manifest takes the index after the last clip.

use std::sync::Arc;

use async_trait::async_trait;
use reframe_media::{group_words, slice_lines, to_vtt, MediaToolkit, SubtitleLine};
use reframe_models::{
    AssetKind, CaptionsOptions, CutClipOptions, JobType, ManifestClip, MediaAsset, SegmentSelection,
    ShortsManifest, ShortsOptions, StageName, Transcript,
};
use reframe_storage::MaterializedAsset;

use super::transcribe::grouping_config;
use super::{OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput};

/// Seconds into a clip at which its thumbnail frame is taken.
const THUMBNAIL_OFFSET: f64 = 0.5;

/// Scratch file name of a cut clip.
fn clip_file(index: Option<usize>) -> String {
    match index {
        Some(i) => format!("clip-{i}.mp4"),
        None => "clip.mp4".to_string(),
    }
}

pub struct CutClipExecutor {
    toolkit: Arc<dyn MediaToolkit>,
}

impl CutClipExecutor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { toolkit }
    }

    async fn cut(
        &self,
        ctx: &StageContext,
        video: &MaterializedAsset,
        index: Option<usize>,
        start: f64,
        end: f64,
    ) -> Result<MediaAsset, StageError> {
        let out = ctx.scratch_path(&clip_file(index));
        self.toolkit.cut(video.path(), start, end, &out).await?;
        ctx.store_output(
            index,
            OutputArtifact::file(&out, AssetKind::Video, &video.asset.mime_type, "mp4").with_duration(Some(end - start)),
        )
        .await
    }

    /// Grab one frame of a cut clip. A failed grab costs the clip its
    /// thumbnail, not the stage.
    async fn thumbnail(
        &self,
        ctx: &StageContext,
        index: usize,
        duration: f64,
        warnings: &mut Vec<String>,
    ) -> Result<Option<MediaAsset>, StageError> {
        let clip = ctx.scratch_path(&clip_file(Some(index)));
        let out = ctx.scratch_path(&format!("thumb-{index}.png"));
        let at = THUMBNAIL_OFFSET.min(duration / 2.0);
        if let Err(e) = self.toolkit.thumbnail(&clip, at, &out).await {
            let msg = format!("no thumbnail for clip {}: {e}", index + 1);
            ctx.logger.log_warning(&msg);
            warnings.push(msg);
            return Ok(None);
        }
        let artifact = OutputArtifact::file(&out, AssetKind::Image, "image/png", "png");
        Ok(Some(ctx.store_output(Some(index), artifact).await?))
    }

    async fn cut_shorts(
        &self,
        ctx: &StageContext,
        inputs: &StageInputs,
        video: &MaterializedAsset,
    ) -> Result<StageOutput, StageError> {
        let options: ShortsOptions = ctx.options()?;
        let selection_asset = inputs.require_from_stage(StageName::SegmentSelect, AssetKind::Json)?;
        let selection: SegmentSelection = inputs.read_json(selection_asset).await?;
        let total = selection.clips.len();

        let lines: Option<Vec<SubtitleLine>> = if options.use_subtitles {
            let transcript_asset = inputs.require_from_stage(StageName::Transcribe, AssetKind::Json)?;
            let transcript: Transcript = inputs.read_json(transcript_asset).await?;
            let captions: CaptionsOptions = ctx.options()?;
            Some(group_words(&transcript.spans, &grouping_config(&captions)))
        } else {
            None
        };

        let mut assets = Vec::with_capacity(total * 3 + 1);
        let mut warnings: Vec<String> = selection.reason.iter().cloned().collect();
        let mut manifest = ShortsManifest {
            source_asset_id: Some(video.asset.id.clone()),
            clips: Vec::with_capacity(total),
            reason: selection.reason.clone(),
        };

        for (i, clip) in selection.clips.iter().enumerate() {
            ctx.cancel.checkpoint().await?;
            let c = &clip.candidate;
            let asset = self.cut(ctx, video, Some(i), c.start, c.end).await?;
            let thumbnail = self.thumbnail(ctx, i, c.duration(), &mut warnings).await?;

            let subtitle = match &lines {
                Some(lines) => {
                    let sliced = slice_lines(lines, c.start, c.end);
                    let artifact = OutputArtifact::text(to_vtt(&sliced), AssetKind::Subtitle, "text/vtt", "vtt")
                        .with_duration(Some(c.duration()));
                    Some(ctx.store_output(Some(i), artifact).await?)
                }
                None => None,
            };

            manifest.clips.push(ManifestClip {
                id: clip.clip_id.clone(),
                asset_id: asset.id.clone(),
                start: c.start,
                end: c.end,
                duration: c.duration(),
                score: c.score,
                reason: c.reason.clone(),
                uri: asset.locator.clone(),
                thumbnail_uri: thumbnail.as_ref().map(|a| a.locator.clone()),
                subtitle_uri: subtitle.as_ref().map(|a| a.locator.clone()),
            });
            assets.push(asset);
            assets.extend(thumbnail);
            assets.extend(subtitle);
            ctx.progress.report((i + 1) as f64 / (total + 1) as f64).await;
        }

        assets.push(ctx.store_output(Some(total), OutputArtifact::json(&manifest)?).await?);
        ctx.logger.log_progress(&format!("Cut {total} shorts clip(s)"));

        Ok(StageOutput::new(assets).with_warnings(warnings))
    }

    async fn cut_single(&self, ctx: &StageContext, video: &MaterializedAsset) -> Result<StageOutput, StageError> {
        let options: CutClipOptions = ctx.options()?;
        let mut end = options.end;
        let mut warnings = Vec::new();

        if let Some(duration) = self.toolkit.probe(video.path()).await?.duration {
            if options.start >= duration {
                return Err(StageError::validation(format!(
                    "cut starts at {:.3}s but the video is {:.3}s long",
                    options.start, duration
                )));
            }
            if end > duration {
                let msg = format!("cut end {end:.3}s clamped to the video length {duration:.3}s");
                ctx.logger.log_warning(&msg);
                warnings.push(msg);
                end = duration;
            }
        }
        ctx.cancel.checkpoint().await?;

        let asset = self.cut(ctx, video, None, options.start, end).await?;
        Ok(StageOutput::new(vec![asset]).with_warnings(warnings))
    }
}

#[async_trait]
impl StageExecutor for CutClipExecutor {
    fn stage(&self) -> StageName {
        StageName::CutClip
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let video = inputs.input(0)?;
        if video.asset.kind != AssetKind::Video {
            return Err(StageError::validation(format!(
                "cut-clip needs a video input, got {}",
                video.asset.kind
            )));
        }

        if ctx.job.job_type == JobType::Shorts {
            self.cut_shorts(ctx, &inputs, video).await
        } else {
            self.cut_single(ctx, video).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testing::{FakeToolkit, Harness};
    use reframe_models::{Job, SegmentCandidate, SelectedClip, TranscriptSpan};
    use reframe_storage::AssetStore;

    async fn shorts_job_at_cut(h: &Harness, selection: &SegmentSelection) -> Job {
        shorts_job_with(h, selection, serde_json::json!({}), &Transcript::default()).await
    }

    async fn shorts_job_with(
        h: &Harness,
        selection: &SegmentSelection,
        config: serde_json::Value,
        transcript: &Transcript,
    ) -> Job {
        let video = h.upload(b"video", AssetKind::Video, "video/mp4").await;
        let job = h.job(JobType::Shorts, vec![video], config).await;
        let audio = h
            .stage_output(&job, StageName::ExtractAudio, b"RIFF", AssetKind::Audio, "audio/wav", "wav")
            .await;
        let job = h.advance(&job, vec![audio]).await;
        let transcript = h
            .stage_output(
                &job,
                StageName::Transcribe,
                &serde_json::to_vec(transcript).unwrap(),
                AssetKind::Json,
                "application/json",
                "json",
            )
            .await;
        let job = h.advance(&job, vec![transcript]).await;
        let selected = h
            .stage_output(
                &job,
                StageName::SegmentSelect,
                &serde_json::to_vec(selection).unwrap(),
                AssetKind::Json,
                "application/json",
                "json",
            )
            .await;
        h.advance(&job, vec![selected]).await
    }

    fn clip(n: usize, start: f64, end: f64) -> SelectedClip {
        let mut candidate = SegmentCandidate::new(start, end);
        candidate.score = 1.0;
        candidate.reason = "duration 1.00".into();
        SelectedClip {
            clip_id: format!("clip-{n}"),
            candidate,
        }
    }

    #[tokio::test]
    async fn test_shorts_cut_every_clip_and_write_manifest() {
        let h = Harness::new();
        let selection = SegmentSelection {
            clips: vec![clip(1, 0.0, 12.0), clip(2, 30.0, 50.0)],
            min_duration: 10.0,
            max_duration: 60.0,
            widened: false,
            reason: None,
        };
        let job = shorts_job_at_cut(&h, &selection).await;

        let toolkit = Arc::new(FakeToolkit::new(120.0));
        let executor = CutClipExecutor::new(toolkit.clone());
        let ctx = h.context(&job, StageName::CutClip);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        assert_eq!(
            toolkit.calls(),
            vec!["cut 0.0-12.0", "thumbnail 0.5", "cut 30.0-50.0", "thumbnail 0.5"]
        );
        assert_eq!(output.assets.len(), 5);
        assert_eq!(output.assets[0].key, format!("{}/cut-clip/1-0.mp4", job.id));
        assert_eq!(output.assets[1].key, format!("{}/cut-clip/1-0.png", job.id));
        assert_eq!(output.assets[1].kind, AssetKind::Image);
        assert_eq!(output.assets[4].key, format!("{}/cut-clip/1-2.json", job.id));

        let manifest: ShortsManifest =
            serde_json::from_slice(&h.store.read(&output.assets[4].id).await.unwrap()).unwrap();
        assert_eq!(manifest.clips.len(), 2);
        assert_eq!(manifest.clips[0].id, "clip-1");
        assert_eq!(manifest.clips[1].asset_id, output.assets[2].id);
        assert_eq!(manifest.clips[1].duration, 20.0);
        assert_eq!(manifest.clips[1].uri, output.assets[2].locator);
        assert_eq!(manifest.clips[1].thumbnail_uri.as_deref(), Some(output.assets[3].locator.as_str()));
        assert!(manifest.clips.iter().all(|c| c.subtitle_uri.is_none()));
    }

    #[tokio::test]
    async fn test_shorts_subtitles_are_sliced_per_clip() {
        let h = Harness::new();
        let selection = SegmentSelection {
            clips: vec![clip(1, 10.0, 20.0), clip(2, 40.0, 55.0)],
            min_duration: 10.0,
            max_duration: 60.0,
            widened: false,
            reason: None,
        };
        let transcript = Transcript {
            spans: vec![
                TranscriptSpan::new("hello", 11.0, 12.0),
                TranscriptSpan::new("later", 45.0, 46.5),
            ],
            ..Transcript::default()
        };
        let job = shorts_job_with(&h, &selection, serde_json::json!({"use_subtitles": true}), &transcript).await;

        let executor = CutClipExecutor::new(Arc::new(FakeToolkit::new(120.0)));
        let ctx = h.context(&job, StageName::CutClip);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        // clip, thumbnail, subtitle per clip, then the manifest
        assert_eq!(output.assets.len(), 7);
        let subtitle = &output.assets[2];
        assert_eq!(subtitle.kind, AssetKind::Subtitle);
        assert_eq!(subtitle.key, format!("{}/cut-clip/1-0.vtt", job.id));
        let vtt = String::from_utf8(h.store.read(&subtitle.id).await.unwrap()).unwrap();
        assert!(vtt.contains("00:00:01.000 --> 00:00:02.000\nhello"));
        assert!(!vtt.contains("later"));

        let manifest: ShortsManifest =
            serde_json::from_slice(&h.store.read(&output.assets[6].id).await.unwrap()).unwrap();
        assert_eq!(manifest.clips[0].subtitle_uri.as_deref(), Some(subtitle.locator.as_str()));
        let second = String::from_utf8(h.store.read(&output.assets[5].id).await.unwrap()).unwrap();
        assert!(second.contains("00:00:05.000 --> 00:00:06.500\nlater"));
    }

    #[tokio::test]
    async fn test_failed_thumbnail_keeps_the_clip() {
        let h = Harness::new();
        let selection = SegmentSelection {
            clips: vec![clip(1, 0.0, 12.0)],
            min_duration: 10.0,
            max_duration: 60.0,
            widened: false,
            reason: None,
        };
        let job = shorts_job_at_cut(&h, &selection).await;
        let toolkit = FakeToolkit {
            fail_thumbnails: true,
            ..FakeToolkit::new(120.0)
        };
        let executor = CutClipExecutor::new(Arc::new(toolkit));

        let ctx = h.context(&job, StageName::CutClip);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        assert_eq!(output.assets.len(), 2);
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].contains("no thumbnail for clip 1"));
        let manifest: ShortsManifest =
            serde_json::from_slice(&h.store.read(&output.assets[1].id).await.unwrap()).unwrap();
        assert!(manifest.clips[0].thumbnail_uri.is_none());
    }

    #[tokio::test]
    async fn test_empty_selection_still_writes_manifest() {
        let h = Harness::new();
        let selection = SegmentSelection {
            reason: Some("transcript has no spans".into()),
            ..SegmentSelection::default()
        };
        let job = shorts_job_at_cut(&h, &selection).await;
        let executor = CutClipExecutor::new(Arc::new(FakeToolkit::new(120.0)));

        let ctx = h.context(&job, StageName::CutClip);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        assert_eq!(output.assets.len(), 1);
        assert_eq!(output.assets[0].kind, AssetKind::Json);
        assert_eq!(output.warnings, vec!["transcript has no spans".to_string()]);
    }

    #[tokio::test]
    async fn test_single_cut_clamps_end() {
        let h = Harness::new();
        let video = h.upload(b"video", AssetKind::Video, "video/mp4").await;
        let job = h
            .job(JobType::CutClip, vec![video], serde_json::json!({"start": 5.0, "end": 90.0}))
            .await;
        let toolkit = Arc::new(FakeToolkit::new(60.0));
        let executor = CutClipExecutor::new(toolkit.clone());

        let ctx = h.context(&job, StageName::CutClip);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        assert_eq!(toolkit.calls(), vec!["cut 5.0-60.0"]);
        assert_eq!(output.assets[0].key, format!("{}/cut-clip/1.mp4", job.id));
        assert_eq!(output.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_single_cut_past_end_is_invalid() {
        let h = Harness::new();
        let video = h.upload(b"video", AssetKind::Video, "video/mp4").await;
        let job = h
            .job(JobType::CutClip, vec![video], serde_json::json!({"start": 70.0, "end": 90.0}))
            .await;
        let executor = CutClipExecutor::new(Arc::new(FakeToolkit::new(60.0)));

        let ctx = h.context(&job, StageName::CutClip);
        let err = executor.execute(&ctx, h.inputs(&job).await).await.unwrap_err();
        assert!(matches!(err, StageError::Validation(_)));
    }
}
