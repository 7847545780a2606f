//! Stage worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reframe_jobs::{build_repository, RepoBackend, RepoConfig, RetryConfig};
use reframe_media::EngineConfig;
use reframe_queue::{MemoryTaskQueue, ProgressChannel, QueueConfig, RedisTaskQueue, TaskQueue};
use reframe_storage::{build_store, StoreConfig};
use reframe_worker::{Collaborators, Dispatcher, RetentionSweeper, StageRegistry, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reframe=info".parse()?)
        .add_directive("reframe_worker=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reframe-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus exporter")?;
        info!(%addr, "Serving worker metrics");
    }

    let repo_config = RepoConfig::from_env()?;
    let repo = build_repository(&repo_config)?;

    // The memory repository cannot be shared with the API process, so the
    // queue follows the same backend choice.
    let queue: Arc<dyn TaskQueue> = match repo_config.backend {
        RepoBackend::Redis => Arc::new(RedisTaskQueue::new(QueueConfig::from_env())?),
        RepoBackend::Memory => {
            warn!("Memory repository selected; jobs are not shared with other processes");
            Arc::new(MemoryTaskQueue::new())
        }
    };

    let store_config = StoreConfig::from_env()?;
    let store = build_store(&store_config)?;

    let collaborators = Collaborators::ffmpeg(EngineConfig::from_env(), config.selector.clone());
    let registry = StageRegistry::with_defaults(&collaborators);

    let mut dispatcher = Dispatcher::new(config.clone(), repo.clone(), queue, store.clone(), registry)
        .with_repo_retry(RetryConfig::from_env())
        .with_scratch_root(store_config.scratch_root());

    if repo_config.backend == RepoBackend::Redis {
        match ProgressChannel::new(&repo_config.redis_url) {
            Ok(channel) => dispatcher = dispatcher.with_publisher(Arc::new(channel)),
            Err(e) => warn!("Progress events disabled: {}", e),
        }
    }
    let dispatcher = Arc::new(dispatcher);

    let (sweeper_tx, sweeper_rx) = watch::channel(false);
    let sweeper = RetentionSweeper::new(config.retention.clone(), repo, store)
        .with_scratch_root(store_config.scratch_root());
    let sweeper_handle = tokio::spawn(sweeper.run(sweeper_rx));

    let signal_dispatcher = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_dispatcher.shutdown();
    });

    let result = Arc::clone(&dispatcher).run().await;

    sweeper_tx.send(true).ok();
    sweeper_handle.await.ok();

    if let Err(e) = result {
        error!("Dispatcher error: {}", e);
        return Err(e.into());
    }

    info!("Worker shutdown complete");
    Ok(())
}
