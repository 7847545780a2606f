//! Typed per-job-type options parsed from a job's config map.
//!
//! The config map is shared by every stage of a job, so each stage reads the
//! struct it needs and ignores unrelated keys.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::job::{JobConfig, JobType, NewJob};

/// Errors from parsing or validating job options.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("Malformed options: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid options: {0}")]
    Invalid(String),
}

/// Deserialize and validate options of type `T` from a config map.
pub fn parse_options<T>(config: &JobConfig) -> Result<T, OptionsError>
where
    T: DeserializeOwned + Validate,
{
    let options: T = serde_json::from_value(serde_json::Value::Object(config.clone()))?;
    options
        .validate()
        .map_err(|e| OptionsError::Invalid(e.to_string()))?;
    Ok(options)
}

/// Check inputs and config of a creation request before anything is stored.
pub fn validate_request(request: &NewJob) -> Result<(), OptionsError> {
    let (min, max) = request.job_type.input_arity();
    let count = request.input_asset_ids.len();
    if count < min || count > max {
        return Err(OptionsError::Invalid(format!(
            "{} jobs take {} input asset(s), got {}",
            request.job_type,
            if min == max { min.to_string() } else { format!("{min}-{max}") },
            count
        )));
    }

    let config = &request.config;
    match request.job_type {
        JobType::Captions => {
            parse_options::<CaptionsOptions>(config)?;
        }
        JobType::Translate => {
            parse_options::<TranslateOptions>(config)?;
        }
        JobType::StyleRender => {
            parse_options::<StyleOptions>(config)?;
            if count == 1 {
                parse_options::<CaptionsOptions>(config)?;
            }
        }
        JobType::Shorts => {
            parse_options::<ShortsOptions>(config)?;
            parse_options::<CaptionsOptions>(config)?;
        }
        JobType::MergeAv => {
            parse_options::<MergeOptions>(config)?;
        }
        JobType::CutClip => {
            parse_options::<CutClipOptions>(config)?;
        }
    }
    Ok(())
}

/// Speech recognition implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AsrBackend {
    /// Deterministic placeholder transcript
    #[default]
    Noop,
    WhisperCpp,
    Openai,
}

impl AsrBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsrBackend::Noop => "noop",
            AsrBackend::WhisperCpp => "whisper-cpp",
            AsrBackend::Openai => "openai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "noop" => Some(AsrBackend::Noop),
            "whisper-cpp" => Some(AsrBackend::WhisperCpp),
            "openai" => Some(AsrBackend::Openai),
            _ => None,
        }
    }
}

/// Translation implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TranslatorBackend {
    /// Returns the input unchanged
    #[default]
    Noop,
    /// LibreTranslate-compatible HTTP API
    Libre,
}

impl TranslatorBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslatorBackend::Noop => "noop",
            TranslatorBackend::Libre => "libre",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "noop" => Some(TranslatorBackend::Noop),
            "libre" | "libretranslate" => Some(TranslatorBackend::Libre),
            _ => None,
        }
    }
}

/// Subtitle file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleFormat {
    Srt,
    Vtt,
    Ass,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Ass => "ass",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "application/x-subrip",
            SubtitleFormat::Vtt => "text/vtt",
            SubtitleFormat::Ass => "text/x-ass",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "srt" => Some(SubtitleFormat::Srt),
            "vtt" => Some(SubtitleFormat::Vtt),
            "ass" | "ssa" => Some(SubtitleFormat::Ass),
            _ => None,
        }
    }
}

fn default_formats() -> Vec<SubtitleFormat> {
    vec![SubtitleFormat::Srt]
}

fn default_true() -> bool {
    true
}

/// Options for transcription and caption output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct CaptionsOptions {
    /// Overrides the worker's configured recognizer
    pub backend: Option<AsrBackend>,
    pub model: Option<String>,
    #[validate(length(min = 2, max = 16))]
    pub language: Option<String>,
    pub word_timestamps: bool,
    #[validate(length(min = 1))]
    pub formats: Vec<SubtitleFormat>,
    #[validate(range(min = 1, max = 200))]
    pub max_chars_per_line: Option<usize>,
    #[validate(range(min = 1, max = 50))]
    pub max_words_per_line: Option<usize>,
    #[validate(range(min = 0.1, max = 60.0))]
    pub max_line_duration: Option<f64>,
    #[validate(range(min = 0.0, max = 10.0))]
    pub max_gap: Option<f64>,
}

impl Default for CaptionsOptions {
    fn default() -> Self {
        Self {
            backend: None,
            model: None,
            language: None,
            word_timestamps: true,
            formats: default_formats(),
            max_chars_per_line: None,
            max_words_per_line: None,
            max_line_duration: None,
            max_gap: None,
        }
    }
}

/// Options for subtitle translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct TranslateOptions {
    #[validate(length(min = 2, max = 16))]
    pub target_language: String,
    #[serde(default = "default_source_language")]
    #[validate(length(min = 2, max = 16))]
    pub source_language: String,
    /// Emit `original\Ntranslated` lines
    #[serde(default)]
    pub bilingual: bool,
    #[serde(default)]
    pub backend: Option<TranslatorBackend>,
}

fn default_source_language() -> String {
    "en".to_string()
}

/// Vertical placement of burned-in subtitles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    #[default]
    Bottom,
    Top,
    Center,
}

impl SubtitlePosition {
    /// ASS numpad alignment for centered text.
    pub fn ass_alignment(&self) -> u8 {
        match self {
            SubtitlePosition::Bottom => 2,
            SubtitlePosition::Center => 5,
            SubtitlePosition::Top => 8,
        }
    }
}

/// Visual style of burned-in subtitles. Colors are `#RRGGBB`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_style_colors"))]
pub struct SubtitleStyle {
    #[validate(length(min = 1, max = 64))]
    pub font: String,
    #[validate(range(min = 8, max = 200))]
    pub font_size: u32,
    pub text_color: String,
    pub highlight_color: String,
    pub outline_color: String,
    pub outline_enabled: bool,
    #[validate(range(max = 20))]
    pub stroke_width: u32,
    pub shadow_enabled: bool,
    #[validate(range(max = 20))]
    pub shadow_offset: u32,
    pub position: SubtitlePosition,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font: "Arial".to_string(),
            font_size: 48,
            text_color: "#FFFFFF".to_string(),
            highlight_color: "#FFFF00".to_string(),
            outline_color: "#000000".to_string(),
            outline_enabled: true,
            stroke_width: 2,
            shadow_enabled: true,
            shadow_offset: 0,
            position: SubtitlePosition::Bottom,
        }
    }
}

/// Parse `#RRGGBB` (or `RRGGBB`) into its components.
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

fn validate_style_colors(style: &SubtitleStyle) -> Result<(), ValidationError> {
    for color in [&style.text_color, &style.highlight_color, &style.outline_color] {
        if parse_hex_color(color).is_none() {
            return Err(ValidationError::new("hex_color"));
        }
    }
    Ok(())
}

/// A named built-in style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StylePreset {
    pub name: String,
    pub style: SubtitleStyle,
}

/// Built-in style presets.
pub fn style_presets() -> Vec<StylePreset> {
    vec![
        StylePreset {
            name: "classic".to_string(),
            style: SubtitleStyle {
                highlight_color: "#FFEB3B".to_string(),
                ..SubtitleStyle::default()
            },
        },
        StylePreset {
            name: "bold".to_string(),
            style: SubtitleStyle {
                font_size: 52,
                highlight_color: "#FFC857".to_string(),
                stroke_width: 3,
                ..SubtitleStyle::default()
            },
        },
        StylePreset {
            name: "headline".to_string(),
            style: SubtitleStyle {
                font: "Helvetica".to_string(),
                text_color: "#F5F5F5".to_string(),
                highlight_color: "#3A86FF".to_string(),
                position: SubtitlePosition::Top,
                ..SubtitleStyle::default()
            },
        },
    ]
}

/// Options for the style-render stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct StyleOptions {
    #[validate(nested)]
    pub style: SubtitleStyle,
    /// Render only the first N seconds
    #[validate(range(min = 1, max = 600))]
    pub preview_seconds: Option<u32>,
}

/// Options for shorts generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_shorts_bounds"))]
pub struct ShortsOptions {
    #[validate(range(min = 1, max = 20))]
    pub max_clips: usize,
    #[validate(range(min = 1.0, max = 600.0))]
    pub min_duration: f64,
    #[validate(range(min = 1.0, max = 1200.0))]
    pub max_duration: f64,
    /// Free-text steer for scoring
    #[validate(length(max = 2000))]
    pub guidance: Option<String>,
    pub keywords: Vec<String>,
    /// Write a WebVTT file per clip, timed from the clip start
    pub use_subtitles: bool,
}

impl Default for ShortsOptions {
    fn default() -> Self {
        Self {
            max_clips: 3,
            min_duration: 10.0,
            max_duration: 60.0,
            guidance: None,
            keywords: Vec::new(),
            use_subtitles: false,
        }
    }
}

fn validate_shorts_bounds(options: &ShortsOptions) -> Result<(), ValidationError> {
    if options.min_duration >= options.max_duration {
        return Err(ValidationError::new("min_duration_not_below_max"));
    }
    Ok(())
}

/// Options for audio/video merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct MergeOptions {
    /// Audio offset in seconds
    #[validate(range(min = -3600.0, max = 3600.0))]
    pub offset: f64,
    /// Volume factor applied to the added audio
    #[validate(range(min = 0.0, max = 1.0))]
    pub ducking: Option<f64>,
    #[serde(default = "default_true")]
    pub normalize: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            offset: 0.0,
            ducking: None,
            normalize: true,
        }
    }
}

/// Options for a single cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[validate(schema(function = "validate_cut_range"))]
pub struct CutClipOptions {
    pub start: f64,
    pub end: f64,
}

fn validate_cut_range(options: &CutClipOptions) -> Result<(), ValidationError> {
    if !(options.start >= 0.0 && options.end > options.start) {
        return Err(ValidationError::new("cut_range"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetId;
    use serde_json::json;

    fn config(value: serde_json::Value) -> JobConfig {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_shorts_defaults() {
        let options: ShortsOptions = parse_options(&JobConfig::new()).unwrap();
        assert_eq!(options.max_clips, 3);
        assert_eq!(options.min_duration, 10.0);
        assert_eq!(options.max_duration, 60.0);
    }

    #[test]
    fn test_shorts_bounds_must_be_ordered() {
        let result = parse_options::<ShortsOptions>(&config(json!({
            "min_duration": 30.0,
            "max_duration": 20.0
        })));
        assert!(matches!(result, Err(OptionsError::Invalid(_))));
    }

    #[test]
    fn test_translate_requires_target_language() {
        let missing = parse_options::<TranslateOptions>(&JobConfig::new());
        assert!(matches!(missing, Err(OptionsError::Malformed(_))));

        let options: TranslateOptions =
            parse_options(&config(json!({"target_language": "es"}))).unwrap();
        assert_eq!(options.source_language, "en");
        assert!(!options.bilingual);
    }

    #[test]
    fn test_style_rejects_bad_color() {
        let result = parse_options::<StyleOptions>(&config(json!({
            "style": {"text_color": "white"}
        })));
        assert!(result.is_err());

        let ok: StyleOptions = parse_options(&config(json!({
            "style": {"text_color": "#00ff00", "position": "top"},
            "preview_seconds": 5
        })))
        .unwrap();
        assert_eq!(ok.style.position.ass_alignment(), 8);
        assert_eq!(ok.style.font_size, 48);
    }

    #[test]
    fn test_cut_range_validation() {
        assert!(parse_options::<CutClipOptions>(&config(json!({"start": 5.0, "end": 2.0}))).is_err());
        assert!(parse_options::<CutClipOptions>(&config(json!({"start": 0.0, "end": 2.0}))).is_ok());
    }

    #[test]
    fn test_validate_request_checks_input_arity() {
        let request = NewJob::new(JobType::MergeAv, vec![AssetId::from("video")]);
        assert!(validate_request(&request).is_err());

        let request = NewJob::new(
            JobType::MergeAv,
            vec![AssetId::from("video"), AssetId::from("audio")],
        );
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF8000"), Some((255, 128, 0)));
        assert_eq!(parse_hex_color("ff8000"), Some((255, 128, 0)));
        assert_eq!(parse_hex_color("#FF80"), None);
    }

    #[test]
    fn test_presets_are_valid() {
        for preset in style_presets() {
            assert!(preset.style.validate().is_ok(), "{}", preset.name);
        }
    }
}
