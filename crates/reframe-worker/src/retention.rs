//! Periodic retention sweep.
//!
//! Removes terminal jobs older than the TTL together with every asset under
//! their `{job_id}/` prefix, stage outputs that no job references, and
//! scratch directories left behind by crashed workers. Client uploads are
//! never touched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use reframe_jobs::{JobRepository, RepoError};
use reframe_models::{Job, JobId, MediaAsset};
use reframe_storage::{AssetStore, StorageError, SCRATCH_PREFIX};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::error::WorkerResult;
use crate::metrics;

/// Counts of what one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs: usize,
    pub assets: usize,
    pub scratch_dirs: usize,
}

pub struct RetentionSweeper {
    config: RetentionConfig,
    repo: Arc<dyn JobRepository>,
    store: Arc<dyn AssetStore>,
    scratch_root: Option<PathBuf>,
}

impl RetentionSweeper {
    pub fn new(config: RetentionConfig, repo: Arc<dyn JobRepository>, store: Arc<dyn AssetStore>) -> Self {
        Self {
            config,
            repo,
            store,
            scratch_root: None,
        }
    }

    /// Also remove stale scratch directories under `root`.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            ttl_secs = self.config.ttl.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "Starting retention sweeper"
        );
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(
                                jobs = report.jobs,
                                assets = report.assets,
                                scratch_dirs = report.scratch_dirs,
                                "Retention sweep finished"
                            );
                        }
                        Ok(_) => debug!("Retention sweep found nothing to remove"),
                        Err(e) => warn!("Retention sweep failed: {}", e),
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> WorkerResult<SweepReport> {
        let ttl = chrono::Duration::from_std(self.config.ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(ttl).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let mut report = SweepReport::default();

        for job in self.repo.list_expired(cutoff).await? {
            report.assets += self.delete_job_assets(&job).await?;
            if self.repo.delete(&job.id).await? {
                report.jobs += 1;
                debug!(job_id = %job.id, status = %job.status, "Deleted expired job");
            }
        }

        let mut jobs: HashMap<String, Option<Job>> = HashMap::new();
        for asset in self.store.list("").await? {
            if asset.created_at > cutoff {
                continue;
            }
            let Some(owner) = stage_output_owner(&asset) else {
                continue;
            };
            if !jobs.contains_key(owner) {
                let job = match self.repo.get(&JobId::from_string(owner)).await {
                    Ok(job) => Some(job),
                    Err(RepoError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                jobs.insert(owner.to_string(), job);
            }
            let orphaned = match jobs.get(owner).and_then(Option::as_ref) {
                None => true,
                Some(job) => job.is_terminal() && !job.output_asset_ids.contains(&asset.id),
            };
            if orphaned && self.delete_asset(&asset).await? {
                report.assets += 1;
            }
        }

        if let Some(root) = &self.scratch_root {
            report.scratch_dirs = remove_stale_scratch(root, self.config.ttl).await;
        }

        metrics::record_retention_deleted("jobs", report.jobs);
        metrics::record_retention_deleted("assets", report.assets);
        metrics::record_retention_deleted("scratch", report.scratch_dirs);
        Ok(report)
    }

    async fn delete_job_assets(&self, job: &Job) -> WorkerResult<usize> {
        let mut deleted = 0;
        let prefix = format!("{}/", job.id);
        for asset in self.store.list(&prefix).await? {
            if self.delete_asset(&asset).await? {
                deleted += 1;
            }
        }
        // Outputs stored outside the job prefix.
        for id in &job.output_asset_ids {
            match self.store.metadata(id).await {
                Ok(asset) => {
                    if self.delete_asset(&asset).await? {
                        deleted += 1;
                    }
                }
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }

    async fn delete_asset(&self, asset: &MediaAsset) -> WorkerResult<bool> {
        match self.store.delete(&asset.id).await {
            Ok(()) => {
                debug!(asset_id = %asset.id, key = %asset.key, "Deleted asset");
                Ok(true)
            }
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Job id owning a stage-output key (`{job_id}/{stage}/...`).
fn stage_output_owner(asset: &MediaAsset) -> Option<&str> {
    let (owner, rest) = asset.key.split_once('/')?;
    if owner.is_empty() || owner == "uploads" || !rest.contains('/') {
        return None;
    }
    Some(owner)
}

/// Remove `reframe-*` directories under `root` not modified within `ttl`.
async fn remove_stale_scratch(root: &Path, ttl: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(root = %root.display(), "Cannot scan scratch root: {}", e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if !meta.is_dir() || age < ttl {
            continue;
        }
        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), "Failed to remove scratch dir: {}", e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use reframe_jobs::MemoryJobRepository;
    use reframe_models::{AssetId, AssetKind, JobType, NewJob, StageName, StageResult};
    use reframe_storage::{stage_output_key, LocalAssetStore, PutRequest};

    async fn put(store: &dyn AssetStore, key: Option<String>) -> AssetId {
        let mut request = PutRequest::bytes(b"data".to_vec(), AssetKind::Json, "application/json");
        request.key = key;
        store.put(request).await.unwrap().id
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_jobs_and_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(dir.path().join("media")).unwrap());
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());

        let upload = put(store.as_ref(), None).await;

        // A completed captions job with one output plus one orphan from a
        // failed attempt.
        let done = repo
            .create(NewJob::new(JobType::Translate, vec![upload.clone()]))
            .await
            .unwrap();
        repo.begin_attempt(&done.id, 0).await.unwrap();
        let orphan = put(store.as_ref(), Some(stage_output_key(&done.id, StageName::Translate, 1, None, "srt"))).await;
        repo.begin_attempt(&done.id, 0).await.unwrap();
        let output = put(store.as_ref(), Some(stage_output_key(&done.id, StageName::Translate, 2, None, "srt"))).await;
        repo.advance(&done.id, 0, StageResult::new(vec![output.clone()])).await.unwrap();

        // A running job's stray output is kept until the job ends.
        let running = repo
            .create(NewJob::new(JobType::Translate, vec![upload.clone()]))
            .await
            .unwrap();
        repo.begin_attempt(&running.id, 0).await.unwrap();
        let in_flight = put(store.as_ref(), Some(stage_output_key(&running.id, StageName::Translate, 1, None, "srt"))).await;

        // Output of a job that no longer exists.
        let ghost = put(store.as_ref(), Some("ghost-job/translate/1.srt".to_string())).await;

        let scratch_root = dir.path().join("scratch");
        std::fs::create_dir_all(scratch_root.join(format!("{SCRATCH_PREFIX}stale"))).unwrap();
        std::fs::create_dir_all(scratch_root.join("unrelated")).unwrap();

        let sweeper = RetentionSweeper::new(
            RetentionConfig {
                ttl: Duration::ZERO,
                interval: Duration::from_secs(3600),
            },
            repo.clone(),
            store.clone(),
        )
        .with_scratch_root(&scratch_root);
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report.jobs, 1);
        assert_eq!(report.assets, 3);
        assert_eq!(report.scratch_dirs, 1);

        assert!(repo.get(&done.id).await.is_err());
        for gone in [&orphan, &output, &ghost] {
            assert!(store.metadata(gone).await.is_err());
        }
        assert!(store.metadata(&upload).await.is_ok());
        assert!(store.metadata(&in_flight).await.is_ok());
        assert!(repo.get(&running.id).await.is_ok());
        assert!(scratch_root.join("unrelated").exists());
    }

    #[tokio::test]
    async fn test_fresh_data_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(dir.path().join("media")).unwrap());
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
        put(store.as_ref(), Some("ghost-job/translate/1.srt".to_string())).await;

        let sweeper = RetentionSweeper::new(RetentionConfig::default(), repo, store);
        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }
}
