//! Transcript spans and clip-selection records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::asset::AssetId;

/// A timed piece of recognized speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSpan {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl TranscriptSpan {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Output of the transcribe stage, persisted as a JSON asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    pub spans: Vec<TranscriptSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Name of the recognizer that produced the spans
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Transcript {
    pub fn duration(&self) -> f64 {
        self.spans.iter().map(|s| s.end).fold(0.0, f64::max)
    }

    pub fn text(&self) -> String {
        self.spans
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A scored, timed span proposed as a short clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentCandidate {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub snippet: String,
}

impl SegmentCandidate {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            score: 0.0,
            reason: String::new(),
            snippet: String::new(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Half-open interval overlap; touching spans do not overlap.
    pub fn overlaps(&self, other: &SegmentCandidate) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A candidate accepted by the selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SelectedClip {
    /// `{job_id}-clip-{n}`, numbered by start time
    pub clip_id: String,
    #[serde(flatten)]
    pub candidate: SegmentCandidate,
}

/// Output of the segment-select stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentSelection {
    pub clips: Vec<SelectedClip>,
    /// Duration bounds the clips satisfy
    pub min_duration: f64,
    pub max_duration: f64,
    /// Whether the fallback bounds were used
    #[serde(default)]
    pub widened: bool,
    /// Explanation when no clips were selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One clip entry of a shorts manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestClip {
    pub id: String,
    pub asset_id: AssetId,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub score: f64,
    #[serde(default)]
    pub reason: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_uri: Option<String>,
}

/// Final shorts output listing every cut clip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ShortsManifest {
    pub source_asset_id: Option<AssetId>,
    pub clips: Vec<ManifestClip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
