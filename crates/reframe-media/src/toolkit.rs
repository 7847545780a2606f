//! Media primitives used by the pipeline stages.

use std::path::Path;

use async_trait::async_trait;
use reframe_models::MergeOptions;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_media, MediaInfo};

/// Probe, cut, merge and audio extraction.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;

    /// Copy `[start, end)` of `path` into `out` without re-encoding.
    async fn cut(&self, path: &Path, start: f64, end: f64, out: &Path) -> MediaResult<()>;

    /// Lay `audio` over `video`, shifted by `options.offset` seconds.
    async fn merge_audio_video(
        &self,
        video: &Path,
        audio: &Path,
        options: &MergeOptions,
        out: &Path,
    ) -> MediaResult<()>;

    /// Write the audio track of `video` to `out` as 16 kHz mono WAV.
    async fn extract_audio(&self, video: &Path, out: &Path) -> MediaResult<()>;

    /// Write the frame at `at` seconds to `out` as a PNG, 320 pixels wide.
    async fn thumbnail(&self, video: &Path, at: f64, out: &Path) -> MediaResult<()>;
}

/// [`MediaToolkit`] backed by the ffmpeg and ffprobe CLIs.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    runner: FfmpegRunner,
}

impl FfmpegToolkit {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

pub(crate) fn cut_command(path: &Path, start: f64, end: f64, out: &Path) -> MediaResult<FfmpegCommand> {
    if !(start >= 0.0 && end > start) {
        return Err(MediaError::UnsupportedFormat(format!(
            "invalid cut range {start:.3}..{end:.3}"
        )));
    }
    Ok(FfmpegCommand::new(path, out)
        .seek(start)
        .duration(end - start)
        .output_args(["-c", "copy", "-avoid_negative_ts", "make_zero"]))
}

pub(crate) fn thumbnail_command(video: &Path, at: f64, out: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video, out)
        .seek(at.max(0.0))
        .output_args(["-frames:v", "1", "-vf", "scale=320:-1"])
}

/// Audio graph for a merge. The added track is mixed with the video's own
/// audio when there is one.
pub(crate) fn merge_filter(options: &MergeOptions, video_has_audio: bool) -> String {
    let mut graph = Vec::new();
    let added = match options.ducking {
        Some(volume) => {
            graph.push(format!("[1:a]volume={volume}[added]"));
            "[added]"
        }
        None => "[1:a]",
    };

    let mixed = if video_has_audio {
        graph.push(format!("[0:a]{added}amix=inputs=2:duration=first[mixed]"));
        "[mixed]"
    } else {
        added
    };

    if options.normalize {
        graph.push(format!("{mixed}loudnorm[aout]"));
    } else {
        graph.push(format!("{mixed}anull[aout]"));
    }
    graph.join(";")
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe_media(path).await
    }

    async fn cut(&self, path: &Path, start: f64, end: f64, out: &Path) -> MediaResult<()> {
        let cmd = cut_command(path, start, end, out)?;
        self.runner.run(&cmd).await?;
        info!(output = %out.display(), start, end, "Cut clip");
        Ok(())
    }

    async fn merge_audio_video(
        &self,
        video: &Path,
        audio: &Path,
        options: &MergeOptions,
        out: &Path,
    ) -> MediaResult<()> {
        let info = probe_media(video).await?;
        if !info.has_video() {
            return Err(MediaError::InvalidMedia(format!(
                "{} has no video stream",
                video.display()
            )));
        }

        let cmd = FfmpegCommand::new(video, out)
            .add_input(audio)
            .input_offset(options.offset)
            .filter_complex(merge_filter(options, info.has_audio()))
            .map("0:v:0")
            .map("[aout]")
            .video_codec("copy")
            .audio_codec("aac")
            .output_arg("-shortest");
        self.runner.run(&cmd).await?;
        info!(output = %out.display(), offset = options.offset, "Merged audio and video");
        Ok(())
    }

    async fn extract_audio(&self, video: &Path, out: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(video, out).output_args([
            "-vn",
            "-ac",
            "1",
            "-ar",
            "16000",
            "-c:a",
            "pcm_s16le",
        ]);
        self.runner.run(&cmd).await?;
        info!(output = %out.display(), "Extracted audio");
        Ok(())
    }

    async fn thumbnail(&self, video: &Path, at: f64, out: &Path) -> MediaResult<()> {
        self.runner.run(&thumbnail_command(video, at, out)).await?;
        debug!(output = %out.display(), at, "Extracted thumbnail");
        Ok(())
    }
}
