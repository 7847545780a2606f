//! Asset handlers.

use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reframe_models::{AssetId, AssetKind, MediaAsset};
use reframe_storage::Location;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub kind: String,
    /// Defaults to the kind's usual MIME type
    pub mime: Option<String>,
}

/// POST /api/v1/assets?kind=video&mime=video/mp4
///
/// The raw request body is the asset content.
pub async fn upload_asset(
    State(state): State<AppState>,
    query: Result<Query<UploadQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<MediaAsset>)> {
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    let kind = AssetKind::parse(&query.kind)
        .ok_or_else(|| ApiError::validation(format!("unknown asset kind: {}", query.kind)))?;
    let mime = query.mime.filter(|m| !m.trim().is_empty());

    let asset = state.service.upload_asset(body.to_vec(), kind, mime).await?;
    metrics::record_upload(kind.as_str(), asset.size_bytes);
    Ok((StatusCode::CREATED, Json(asset)))
}

/// Asset metadata plus where to fetch its bytes.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssetResponse {
    #[serde(flatten)]
    pub asset: MediaAsset,
    /// Presigned URL for remote stores, otherwise the API download path
    pub download_url: String,
}

/// GET /api/v1/assets/:id
pub async fn get_asset(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<AssetResponse>> {
    let locator = state.service.get_asset(&AssetId::from_string(id)).await?;
    let download_url = match locator.location {
        Location::Remote { url, .. } => url,
        Location::Local(_) => format!("/api/v1/assets/{}/download", locator.asset.id),
    };
    Ok(Json(AssetResponse {
        asset: locator.asset,
        download_url,
    }))
}

/// GET /api/v1/assets/:id/download
pub async fn download_asset(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let (asset, bytes) = state.service.read_asset(&AssetId::from_string(id)).await?;

    let content_type = HeaderValue::from_str(&asset.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let filename = match asset.extension() {
        "" => asset.id.to_string(),
        ext => format!("{}.{}", asset.id, ext),
    };
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)],
        Body::from(bytes),
    )
        .into_response())
}
