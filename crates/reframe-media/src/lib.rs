//! Media engines for the Reframe pipeline.
//!
//! This crate provides:
//! - FFmpeg command building and execution with `-progress pipe:2` parsing
//! - ffprobe media inspection
//! - Subtitle grouping and SRT / WebVTT / ASS encoding
//! - Collaborator traits with their implementations: [`MediaToolkit`],
//!   [`SubtitleRenderer`], [`SpeechRecognizer`] and [`Translator`]

pub mod asr;
pub mod command;
pub mod engines;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod progress;
pub mod render;
pub mod subtitles;
pub mod toolkit;
pub mod translate;

pub use asr::{
    build_recognizer, NoopRecognizer, OpenAiRecognizer, SpeechRecognizer, TranscribeConfig,
    WhisperCppRecognizer,
};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use engines::EngineConfig;
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, MediaInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use render::{ass_color, force_style, FfmpegSubtitleRenderer, SubtitleRenderer};
pub use subtitles::{
    group_words, parse_srt, parse_vtt, slice_lines, to_ass, to_ass_karaoke, to_srt, to_vtt,
    GroupingConfig, SubtitleLine,
};
pub use toolkit::{FfmpegToolkit, MediaToolkit};
pub use translate::{build_translator, translate_lines, LibreTranslator, NoopTranslator, Translator};
