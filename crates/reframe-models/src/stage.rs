//! Pipeline stages and per-job-type stage plans.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::JobType;

/// One step of a job pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    ExtractAudio,
    Transcribe,
    SegmentSelect,
    StyleRender,
    Translate,
    MergeAudioVideo,
    CutClip,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::ExtractAudio,
        StageName::Transcribe,
        StageName::SegmentSelect,
        StageName::StyleRender,
        StageName::Translate,
        StageName::MergeAudioVideo,
        StageName::CutClip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::ExtractAudio => "extract-audio",
            StageName::Transcribe => "transcribe",
            StageName::SegmentSelect => "segment-select",
            StageName::StyleRender => "style-render",
            StageName::Translate => "translate",
            StageName::MergeAudioVideo => "merge-audio-video",
            StageName::CutClip => "cut-clip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the ordered stage list for a job.
///
/// `input_count` is the number of input assets supplied at creation. A
/// style-render job with a second input already has its subtitle and skips
/// transcription.
pub fn plan_stages(job_type: JobType, input_count: usize) -> Vec<StageName> {
    use StageName::*;

    match job_type {
        JobType::Captions => vec![ExtractAudio, Transcribe],
        JobType::Translate => vec![Translate],
        JobType::StyleRender if input_count >= 2 => vec![StyleRender],
        JobType::StyleRender => vec![ExtractAudio, Transcribe, StyleRender],
        JobType::Shorts => vec![ExtractAudio, Transcribe, SegmentSelect, CutClip],
        JobType::MergeAv => vec![MergeAudioVideo],
        JobType::CutClip => vec![CutClip],
    }
}
