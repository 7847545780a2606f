//! Shared data models for the Reframe pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their stage plans and the job state machine
//! - Media assets
//! - Transcripts and clip-selection records
//! - Per-job-type options

pub mod asset;
pub mod job;
pub mod options;
pub mod segment;
pub mod stage;

// Re-export common types
pub use asset::{checksum_bytes, extension_for_mime, AssetId, AssetKind, MediaAsset};
pub use job::{
    ErrorKind, Job, JobConfig, JobError, JobId, JobStatus, JobType, NewJob, StageOutcome,
    StageRecord, StageResult, TransitionError,
};
pub use options::{
    parse_hex_color, parse_options, style_presets, validate_request, AsrBackend, CaptionsOptions,
    CutClipOptions, MergeOptions, OptionsError, ShortsOptions, StyleOptions, StylePreset,
    SubtitleFormat, SubtitlePosition, SubtitleStyle, TranslateOptions, TranslatorBackend,
};
pub use segment::{
    ManifestClip, SegmentCandidate, SegmentSelection, SelectedClip, ShortsManifest, Transcript,
    TranscriptSpan,
};
pub use stage::{plan_stages, StageName};
