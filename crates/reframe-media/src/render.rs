//! Burning styled subtitles into video.

use std::path::Path;

use async_trait::async_trait;
use reframe_models::{parse_hex_color, SubtitleStyle};
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::progress::ProgressCallback;

/// Subtitle rendering engine.
#[async_trait]
pub trait SubtitleRenderer: Send + Sync {
    /// Render `video` with `subtitle` burned in.
    async fn burn_subtitles(
        &self,
        video: &Path,
        subtitle: &Path,
        style: &SubtitleStyle,
        out: &Path,
        progress: Option<ProgressCallback>,
    ) -> MediaResult<()>;

    /// Render only the first `seconds` of the video.
    async fn render_preview(
        &self,
        video: &Path,
        subtitle: &Path,
        style: &SubtitleStyle,
        seconds: u32,
        out: &Path,
    ) -> MediaResult<()>;
}

/// `#RRGGBB` to the ASS `&H00BBGGRR` form.
pub fn ass_color(hex: &str) -> MediaResult<String> {
    let (r, g, b) = parse_hex_color(hex)
        .ok_or_else(|| MediaError::UnsupportedFormat(format!("color {hex:?}")))?;
    Ok(format!("&H00{b:02X}{g:02X}{r:02X}"))
}

/// The `force_style` override list for the `subtitles` filter.
pub fn force_style(style: &SubtitleStyle) -> MediaResult<String> {
    let outline = if style.outline_enabled { style.stroke_width } else { 0 };
    let shadow = if style.shadow_enabled { style.shadow_offset } else { 0 };

    let parts = [
        format!("Fontname={}", style.font.replace([',', ':', '\''], " ")),
        format!("Fontsize={}", style.font_size),
        format!("PrimaryColour={}", ass_color(&style.text_color)?),
        format!("SecondaryColour={}", ass_color(&style.highlight_color)?),
        format!("OutlineColour={}", ass_color(&style.outline_color)?),
        "BorderStyle=1".to_string(),
        format!("Outline={outline}"),
        format!("Shadow={shadow}"),
        format!("Alignment={}", style.position.ass_alignment()),
    ];
    Ok(parts.join("\\,"))
}

/// Escape a path for use as a filter option value.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
        .replace(',', "\\,")
}

/// The `-vf` value burning `subtitle` with `style`.
pub fn subtitles_filter(subtitle: &Path, style: &SubtitleStyle) -> MediaResult<String> {
    Ok(format!(
        "subtitles={}:force_style={}",
        escape_filter_path(subtitle),
        force_style(style)?
    ))
}

/// [`SubtitleRenderer`] using ffmpeg's `subtitles` filter (libass).
#[derive(Debug, Clone, Default)]
pub struct FfmpegSubtitleRenderer {
    runner: FfmpegRunner,
}

impl FfmpegSubtitleRenderer {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }

    fn build(
        video: &Path,
        subtitle: &Path,
        style: &SubtitleStyle,
        preview: Option<u32>,
        out: &Path,
    ) -> MediaResult<FfmpegCommand> {
        let mut cmd = FfmpegCommand::new(video, out);
        if let Some(seconds) = preview {
            cmd = cmd.duration(seconds as f64);
        }
        Ok(cmd
            .video_filter(subtitles_filter(subtitle, style)?)
            .map("0:v:0")
            .map("0:a?")
            .video_codec("libx264")
            .output_args(["-preset", "veryfast", "-crf", "20", "-pix_fmt", "yuv420p"])
            .audio_codec("aac")
            .output_args(["-movflags", "+faststart"]))
    }
}

#[async_trait]
impl SubtitleRenderer for FfmpegSubtitleRenderer {
    async fn burn_subtitles(
        &self,
        video: &Path,
        subtitle: &Path,
        style: &SubtitleStyle,
        out: &Path,
        progress: Option<ProgressCallback>,
    ) -> MediaResult<()> {
        let cmd = Self::build(video, subtitle, style, None, out)?;
        match progress {
            Some(callback) => self.runner.run_with_progress(&cmd, callback).await?,
            None => self.runner.run(&cmd).await?,
        }
        info!(output = %out.display(), "Burned subtitles");
        Ok(())
    }

    async fn render_preview(
        &self,
        video: &Path,
        subtitle: &Path,
        style: &SubtitleStyle,
        seconds: u32,
        out: &Path,
    ) -> MediaResult<()> {
        let cmd = Self::build(video, subtitle, style, Some(seconds), out)?;
        self.runner.run(&cmd).await?;
        info!(output = %out.display(), seconds, "Rendered subtitle preview");
        Ok(())
    }
}
