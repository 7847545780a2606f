//! Store backend selection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::client::{R2Client, R2Config};
use crate::error::{StorageError, StorageResult};
use crate::local::LocalAssetStore;
use crate::remote::R2AssetStore;
use crate::store::AssetStore;

/// Which backend holds assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Local,
    R2,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Some(StoreBackend::Local),
            "r2" | "s3" => Some(StoreBackend::R2),
            _ => None,
        }
    }
}

/// Asset store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root of the local store, and parent of the scratch directory
    pub media_root: PathBuf,
    /// Lifetime of presigned remote URLs
    pub presign_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            media_root: PathBuf::from("./media"),
            presign_ttl: Duration::from_secs(3600),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("REFRAME_STORE_BACKEND") {
            Ok(value) => StoreBackend::parse(&value).ok_or_else(|| {
                StorageError::config(format!("unknown store backend: {}", value))
            })?,
            Err(_) => StoreBackend::Local,
        };

        Ok(Self {
            backend,
            media_root: std::env::var("REFRAME_MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./media")),
            presign_ttl: Duration::from_secs(
                std::env::var("REFRAME_PRESIGN_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        })
    }

    /// Directory holding per-stage scratch directories.
    pub fn scratch_root(&self) -> PathBuf {
        self.media_root.join("tmp")
    }
}

/// Build the configured store.
pub fn build_store(config: &StoreConfig) -> StorageResult<Arc<dyn AssetStore>> {
    match config.backend {
        StoreBackend::Local => {
            info!(root = %config.media_root.display(), "Using local asset store");
            Ok(Arc::new(LocalAssetStore::new(&config.media_root)?))
        }
        StoreBackend::R2 => {
            let r2 = R2Config::from_env()?;
            info!(bucket = %r2.bucket_name, "Using R2 asset store");
            std::fs::create_dir_all(config.scratch_root())?;
            Ok(Arc::new(R2AssetStore::new(
                R2Client::new(r2),
                config.scratch_root(),
                config.presign_ttl,
            )))
        }
    }
}
