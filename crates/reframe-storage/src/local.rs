//! Local filesystem asset store.
//!
//! Layout under the media root:
//! - `objects/{key}` holds content
//! - `meta/{asset_id}.json` holds the `MediaAsset` record
//! - `tmp/` holds scratch directories

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use reframe_models::{AssetId, MediaAsset};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageOp, StorageResult};
use crate::store::{
    check_asset_id, checksum_file, materialized_name, scratch_dir, verify_record, AssetLocator,
    AssetStore, Location, MaterializedAsset, PutRequest, PutSource,
};

/// Asset store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        for dir in ["objects", "meta", "tmp"] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    fn meta_path(&self, id: &AssetId) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", id))
    }

    async fn read_meta(&self, id: &AssetId) -> StorageResult<Option<MediaAsset>> {
        check_asset_id(id)?;
        match tokio::fs::read(self.meta_path(id)).await {
            Ok(bytes) => Ok(Some(verify_record(id, serde_json::from_slice(&bytes)?)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, asset: &MediaAsset) -> StorageResult<()> {
        let path = self.meta_path(&asset.id);
        let tmp = path.with_extension(format!("json.{}.partial", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(asset)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn require_meta(&self, id: &AssetId) -> StorageResult<MediaAsset> {
        self.read_meta(id)
            .await?
            .ok_or_else(|| StorageError::not_found(id.as_str()))
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn put(&self, request: PutRequest) -> StorageResult<MediaAsset> {
        let key = request.resolve_key()?;
        let id = AssetId::for_key(&key);

        if let Some(existing) = self.read_meta(&id).await? {
            debug!(asset_id = %id, key = %key, "Asset already registered");
            return Ok(existing);
        }

        let target = self.object_path(&key);
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::invalid_key(&key))?;
        tokio::fs::create_dir_all(parent).await?;

        let partial = parent.join(format!(".{}.partial", uuid::Uuid::new_v4()));
        match &request.source {
            PutSource::Bytes(data) => tokio::fs::write(&partial, data).await?,
            PutSource::File(path) => {
                tokio::fs::copy(path, &partial).await?;
            }
        }

        let (checksum, size_bytes) = match checksum_file(&partial).await {
            Ok(result) => result,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &target).await?;

        let asset = MediaAsset {
            id,
            kind: request.kind,
            key,
            locator: target.display().to_string(),
            mime_type: request.mime_type,
            duration: request.duration,
            size_bytes,
            checksum,
            created_at: Utc::now(),
        };
        self.write_meta(&asset).await?;

        info!(asset_id = %asset.id, key = %asset.key, size = size_bytes, "Stored asset");
        Ok(asset)
    }

    async fn get(&self, id: &AssetId) -> StorageResult<AssetLocator> {
        let asset = self.require_meta(id).await?;
        let path = self.object_path(&asset.key);
        Ok(AssetLocator {
            asset,
            location: Location::Local(path),
        })
    }

    async fn metadata(&self, id: &AssetId) -> StorageResult<MediaAsset> {
        self.require_meta(id).await
    }

    async fn read(&self, id: &AssetId) -> StorageResult<Vec<u8>> {
        let asset = self.require_meta(id).await?;
        match tokio::fs::read(self.object_path(&asset.key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(asset.key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &AssetId) -> StorageResult<()> {
        let asset = self.require_meta(id).await?;
        match tokio::fs::remove_file(self.object_path(&asset.key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::backend(StorageOp::Delete, e.to_string())),
        }
        tokio::fs::remove_file(self.meta_path(&asset.id))
            .await
            .map_err(|e| StorageError::backend(StorageOp::Delete, e.to_string()))?;

        debug!(asset_id = %id, key = %asset.key, "Deleted asset");
        Ok(())
    }

    async fn materialize(&self, id: &AssetId) -> StorageResult<MaterializedAsset> {
        let asset = self.require_meta(id).await?;
        let scratch = scratch_dir(&self.scratch_root())?;
        let dest = scratch.path().join(materialized_name(&asset));
        tokio::fs::copy(self.object_path(&asset.key), &dest)
            .await
            .map_err(|e| StorageError::backend(StorageOp::Get, format!("{}: {}", asset.key, e)))?;
        Ok(MaterializedAsset::new(asset, dest, scratch))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<MediaAsset>> {
        let mut entries = tokio::fs::read_dir(self.root.join("meta")).await?;
        let mut assets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(AssetId::from) else {
                continue;
            };
            let asset = match self.read_meta(&id).await {
                Ok(Some(asset)) => asset,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unusable metadata record: {}", e);
                    continue;
                }
            };
            if asset.key.starts_with(prefix) {
                assets.push(asset);
            }
        }
        assets.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(assets)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
