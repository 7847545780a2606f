//! Application state.

use std::sync::Arc;

use anyhow::Context;
use reframe_jobs::{build_repository, JobRepository, JobService, RepoBackend, RepoConfig};
use reframe_queue::{MemoryTaskQueue, QueueConfig, RedisTaskQueue, TaskQueue};
use reframe_storage::{build_store, AssetStore, StoreConfig};
use tracing::warn;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: JobService,
    pub queue: Arc<dyn TaskQueue>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        repo: Arc<dyn JobRepository>,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        let service = JobService::new(repo, Arc::clone(&queue), store);
        Self {
            config,
            service,
            queue,
        }
    }

    /// Build the repository, queue and store from environment variables.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let repo_config = RepoConfig::from_env()?;
        let repo = build_repository(&repo_config).context("failed to create job repository")?;

        let queue: Arc<dyn TaskQueue> = match repo_config.backend {
            RepoBackend::Redis => {
                let queue = RedisTaskQueue::new(QueueConfig::from_env())?;
                queue.init().await.context("failed to initialize task queue")?;
                Arc::new(queue)
            }
            RepoBackend::Memory => {
                warn!("Memory repository selected; no worker process will see these jobs");
                Arc::new(MemoryTaskQueue::new())
            }
        };

        let store = build_store(&StoreConfig::from_env()?).context("failed to create asset store")?;

        Ok(Self::new(config, repo, queue, store))
    }
}
