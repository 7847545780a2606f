//! Asset storage for the Reframe pipeline.
//!
//! This crate provides:
//! - The `AssetStore` trait over immutable media assets
//! - A local filesystem backend
//! - A Cloudflare R2 backend
//! - Deterministic stage-output keys and scratch materialization

pub mod client;
pub mod config;
pub mod error;
pub mod local;
pub mod remote;
pub mod store;

/// Name prefix of scratch directories created by `materialize`.
pub const SCRATCH_PREFIX: &str = "reframe-";

pub use client::{ObjectInfo, R2Client, R2Config};
pub use config::{build_store, StoreBackend, StoreConfig};
pub use error::{StorageError, StorageOp, StorageResult};
pub use local::LocalAssetStore;
pub use remote::R2AssetStore;
pub use store::{
    check_asset_id, checksum_file, stage_output_key, upload_key, validate_key, AssetLocator,
    AssetStore, Location, MaterializedAsset, PutRequest, PutSource,
};
