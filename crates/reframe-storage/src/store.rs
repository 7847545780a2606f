//! The `AssetStore` abstraction shared by every backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reframe_models::{AssetId, AssetKind, JobId, MediaAsset, StageName};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

use crate::error::{StorageError, StorageResult};

/// Content handed to [`AssetStore::put`].
#[derive(Debug, Clone)]
pub enum PutSource {
    Bytes(Vec<u8>),
    /// A local file, copied or streamed by the backend
    File(PathBuf),
}

/// A request to store a new asset.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub source: PutSource,
    pub kind: AssetKind,
    pub mime_type: String,
    /// Storage key; generated under `uploads/` when absent
    pub key: Option<String>,
    pub duration: Option<f64>,
}

impl PutRequest {
    pub fn bytes(data: Vec<u8>, kind: AssetKind, mime_type: impl Into<String>) -> Self {
        Self {
            source: PutSource::Bytes(data),
            kind,
            mime_type: mime_type.into(),
            key: None,
            duration: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>, kind: AssetKind, mime_type: impl Into<String>) -> Self {
        Self {
            source: PutSource::File(path.into()),
            kind,
            mime_type: mime_type.into(),
            key: None,
            duration: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    /// Key to store under, generating an upload key if none was given.
    pub fn resolve_key(&self) -> StorageResult<String> {
        match &self.key {
            Some(key) => {
                validate_key(key)?;
                Ok(key.clone())
            }
            None => Ok(upload_key(reframe_models::extension_for_mime(&self.mime_type))),
        }
    }
}

/// Where an asset's bytes can be read from.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Local(PathBuf),
    /// Time-limited URL for a remote object
    Remote { key: String, url: String },
}

/// Result of [`AssetStore::get`].
#[derive(Debug, Clone)]
pub struct AssetLocator {
    pub asset: MediaAsset,
    pub location: Location,
}

/// An asset copied into a private scratch directory.
///
/// The directory and its contents are removed when this value is dropped,
/// whichever way the holder exits.
#[derive(Debug)]
pub struct MaterializedAsset {
    pub asset: MediaAsset,
    path: PathBuf,
    scratch: TempDir,
}

impl MaterializedAsset {
    pub(crate) fn new(asset: MediaAsset, path: PathBuf, scratch: TempDir) -> Self {
        Self {
            asset,
            path,
            scratch,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory owning the file, usable for sibling outputs.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Storage for immutable media assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store bytes under a new key, or return the existing asset when the key
    /// is already registered. Existing content is never overwritten.
    async fn put(&self, request: PutRequest) -> StorageResult<MediaAsset>;

    /// Resolve an asset to a readable location.
    async fn get(&self, id: &AssetId) -> StorageResult<AssetLocator>;

    /// Asset metadata without resolving a location.
    async fn metadata(&self, id: &AssetId) -> StorageResult<MediaAsset>;

    /// Read the full content.
    async fn read(&self, id: &AssetId) -> StorageResult<Vec<u8>>;

    async fn delete(&self, id: &AssetId) -> StorageResult<()>;

    /// Copy an asset into a fresh scratch directory.
    async fn materialize(&self, id: &AssetId) -> StorageResult<MaterializedAsset>;

    /// Assets whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<MediaAsset>>;

    fn backend_name(&self) -> &'static str;
}

/// Key for a stage output: `{job_id}/{stage}/{attempt}.{ext}`.
///
/// Stages with several outputs pass an index and get
/// `{job_id}/{stage}/{attempt}-{index}.{ext}`.
pub fn stage_output_key(
    job_id: &JobId,
    stage: StageName,
    attempt: u32,
    index: Option<usize>,
    ext: &str,
) -> String {
    match index {
        Some(n) => format!("{}/{}/{}-{}.{}", job_id, stage.as_str(), attempt, n, ext),
        None => format!("{}/{}/{}.{}", job_id, stage.as_str(), attempt, ext),
    }
}

/// Key for a client upload.
pub fn upload_key(ext: &str) -> String {
    format!("uploads/{}.{}", uuid::Uuid::new_v4(), ext)
}

/// Reject keys that could escape the store namespace.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Reject ids that [`AssetId::for_key`] could not have produced.
///
/// Malformed ids report `NotFound` so callers cannot tell them apart from
/// ids that were never issued.
pub fn check_asset_id(id: &AssetId) -> StorageResult<()> {
    if id.is_well_formed() {
        Ok(())
    } else {
        Err(StorageError::not_found(id.as_str()))
    }
}

/// Accept a loaded metadata record only if it belongs to `id` and its key
/// stays inside the store namespace.
pub(crate) fn verify_record(id: &AssetId, asset: MediaAsset) -> StorageResult<MediaAsset> {
    validate_key(&asset.key)?;
    if asset.id != *id || AssetId::for_key(&asset.key) != *id {
        return Err(StorageError::invalid_key(asset.key));
    }
    Ok(asset)
}

/// Stream a file through SHA-256, returning the hex digest and size.
pub async fn checksum_file(path: &Path) -> StorageResult<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Create a scratch directory under `root`.
pub(crate) fn scratch_dir(root: &Path) -> StorageResult<TempDir> {
    std::fs::create_dir_all(root)?;
    Ok(tempfile::Builder::new()
        .prefix(crate::SCRATCH_PREFIX)
        .tempdir_in(root)?)
}

/// File name for a materialized copy of `asset`.
pub(crate) fn materialized_name(asset: &MediaAsset) -> String {
    let ext = asset.extension();
    if ext.is_empty() {
        format!("{}.bin", asset.id)
    } else {
        format!("{}.{}", asset.id, ext)
    }
}
