//! Built-in subtitle style presets.

use axum::Json;
use reframe_models::{style_presets, StylePreset};

/// GET /api/v1/presets/styles
pub async fn list_style_presets() -> Json<Vec<StylePreset>> {
    Json(style_presets())
}
