//! R2-backed asset store.
//!
//! Content lives at `{key}` and the metadata record at `meta/{asset_id}.json`
//! in the same bucket.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reframe_models::{checksum_bytes, AssetId, MediaAsset};
use tracing::{debug, info, warn};

use crate::client::R2Client;
use crate::error::{StorageError, StorageResult};
use crate::store::{
    check_asset_id, checksum_file, materialized_name, scratch_dir, verify_record, AssetLocator,
    AssetStore, Location, MaterializedAsset, PutRequest, PutSource,
};

const META_PREFIX: &str = "meta/";

/// Asset store backed by an R2 bucket.
#[derive(Clone)]
pub struct R2AssetStore {
    client: R2Client,
    scratch_root: PathBuf,
    presign_ttl: Duration,
}

impl R2AssetStore {
    pub fn new(client: R2Client, scratch_root: impl Into<PathBuf>, presign_ttl: Duration) -> Self {
        Self {
            client,
            scratch_root: scratch_root.into(),
            presign_ttl,
        }
    }

    pub fn client(&self) -> &R2Client {
        &self.client
    }

    fn meta_key(id: &AssetId) -> String {
        format!("{}{}.json", META_PREFIX, id)
    }

    async fn read_meta(&self, id: &AssetId) -> StorageResult<Option<MediaAsset>> {
        check_asset_id(id)?;
        match self.client.download_bytes(&Self::meta_key(id)).await {
            Ok(bytes) => Ok(Some(verify_record(id, serde_json::from_slice(&bytes)?)?)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn require_meta(&self, id: &AssetId) -> StorageResult<MediaAsset> {
        self.read_meta(id)
            .await?
            .ok_or_else(|| StorageError::not_found(id.as_str()))
    }
}

#[async_trait]
impl AssetStore for R2AssetStore {
    async fn put(&self, request: PutRequest) -> StorageResult<MediaAsset> {
        let key = request.resolve_key()?;
        let id = AssetId::for_key(&key);

        if let Some(existing) = self.read_meta(&id).await? {
            debug!(asset_id = %id, key = %key, "Asset already registered");
            return Ok(existing);
        }

        let (checksum, size_bytes) = match &request.source {
            PutSource::Bytes(data) => {
                let checksum = checksum_bytes(data);
                let size = data.len() as u64;
                self.client
                    .upload_bytes(data.clone(), &key, &request.mime_type)
                    .await?;
                (checksum, size)
            }
            PutSource::File(path) => {
                let digest = checksum_file(path).await?;
                self.client
                    .upload_file(path, &key, &request.mime_type)
                    .await?;
                digest
            }
        };

        let asset = MediaAsset {
            id,
            kind: request.kind,
            locator: format!("r2://{}/{}", self.client.bucket(), key),
            key,
            mime_type: request.mime_type,
            duration: request.duration,
            size_bytes,
            checksum,
            created_at: Utc::now(),
        };
        self.client
            .upload_bytes(
                serde_json::to_vec(&asset)?,
                &Self::meta_key(&asset.id),
                "application/json",
            )
            .await?;

        info!(asset_id = %asset.id, key = %asset.key, size = size_bytes, "Stored asset in R2");
        Ok(asset)
    }

    async fn get(&self, id: &AssetId) -> StorageResult<AssetLocator> {
        let asset = self.require_meta(id).await?;
        let url = self.client.presign_get(&asset.key, self.presign_ttl).await?;
        Ok(AssetLocator {
            location: Location::Remote {
                key: asset.key.clone(),
                url,
            },
            asset,
        })
    }

    async fn metadata(&self, id: &AssetId) -> StorageResult<MediaAsset> {
        self.require_meta(id).await
    }

    async fn read(&self, id: &AssetId) -> StorageResult<Vec<u8>> {
        let asset = self.require_meta(id).await?;
        self.client.download_bytes(&asset.key).await
    }

    async fn delete(&self, id: &AssetId) -> StorageResult<()> {
        let asset = self.require_meta(id).await?;
        self.client.delete_object(&asset.key).await?;
        self.client.delete_object(&Self::meta_key(&asset.id)).await?;
        debug!(asset_id = %id, key = %asset.key, "Deleted asset from R2");
        Ok(())
    }

    async fn materialize(&self, id: &AssetId) -> StorageResult<MaterializedAsset> {
        let asset = self.require_meta(id).await?;
        let scratch = scratch_dir(&self.scratch_root)?;
        let dest = scratch.path().join(materialized_name(&asset));
        self.client.download_file(&asset.key, &dest).await?;
        Ok(MaterializedAsset::new(asset, dest, scratch))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<MediaAsset>> {
        let mut assets = Vec::new();
        for object in self.client.list_objects(prefix).await? {
            if object.key.starts_with(META_PREFIX) {
                continue;
            }
            match self.read_meta(&AssetId::for_key(&object.key)).await {
                Ok(Some(asset)) => assets.push(asset),
                Ok(None) => warn!(key = %object.key, "Object without metadata record"),
                Err(StorageError::InvalidKey(key)) => {
                    warn!(key = %object.key, record_key = %key, "Skipping mismatched metadata record")
                }
                Err(e) => return Err(e),
            }
        }
        assets.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(assets)
    }

    fn backend_name(&self) -> &'static str {
        "r2"
    }
}
