//! Media asset records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a stored media asset.
///
/// Asset ids are derived from the storage key, so registering the same key
/// twice yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    /// Derive the asset id for a storage key.
    pub fn for_key(key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let hex = format!("{:x}", digest);
        Self(hex[..32].to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id has the shape produced by [`AssetId::for_key`]:
    /// 32 lowercase hex digits.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 32 && self.0.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of media held by an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Video,
    Audio,
    Subtitle,
    Image,
    Json,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Video => "video",
            AssetKind::Audio => "audio",
            AssetKind::Subtitle => "subtitle",
            AssetKind::Image => "image",
            AssetKind::Json => "json",
        }
    }

    /// Parse from the wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Some(AssetKind::Video),
            "audio" => Some(AssetKind::Audio),
            "subtitle" => Some(AssetKind::Subtitle),
            "image" => Some(AssetKind::Image),
            "json" => Some(AssetKind::Json),
            _ => None,
        }
    }

    /// Fallback mime type when none is supplied.
    pub fn default_mime(&self) -> &'static str {
        match self {
            AssetKind::Video => "video/mp4",
            AssetKind::Audio => "audio/wav",
            AssetKind::Subtitle => "application/x-subrip",
            AssetKind::Image => "image/png",
            AssetKind::Json => "application/json",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// File extension for a mime type, used when building storage keys.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or("").trim() {
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "video/webm" => "webm",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mpeg" => "mp3",
        "audio/aac" => "aac",
        "audio/mp4" => "m4a",
        "application/x-subrip" | "text/srt" => "srt",
        "text/vtt" => "vtt",
        "text/x-ssa" | "text/x-ass" => "ass",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "application/json" => "json",
        _ => "bin",
    }
}

/// An immutable stored blob reference with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaAsset {
    pub id: AssetId,
    pub kind: AssetKind,
    /// Key within the store namespace
    pub key: String,
    /// Local path or remote URI
    pub locator: String,
    pub mime_type: String,
    /// Duration in seconds, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the content
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl MediaAsset {
    /// File extension of the stored key.
    pub fn extension(&self) -> &str {
        self.key
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.contains('/'))
            .unwrap_or("")
    }
}

/// Compute the lowercase hex SHA-256 of a byte slice.
pub fn checksum_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
