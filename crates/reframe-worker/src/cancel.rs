//! Cooperative cancellation backed by the job record.
//!
//! The token caches the repository's `cancel_requested` flag and refreshes it
//! at most once per poll interval, so checkpoints inside tight loops stay
//! cheap.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reframe_jobs::JobRepository;
use reframe_models::{JobId, JobStatus};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::stage::StageError;

/// Shortest pause between background refreshes.
const MIN_BACKGROUND_REFRESH: Duration = Duration::from_millis(100);

struct Inner {
    job_id: JobId,
    repo: Option<Arc<dyn JobRepository>>,
    refresh: Duration,
    cancelled: AtomicBool,
    checked_at: Mutex<Option<Instant>>,
}

/// Shared cancellation flag for one job.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("job_id", &self.inner.job_id)
            .field("cancelled", &self.is_cancelled_cached())
            .finish()
    }
}

impl CancellationToken {
    /// Token that polls `repo` for the job's flag every `refresh`.
    pub fn new(job_id: JobId, repo: Arc<dyn JobRepository>, refresh: Duration) -> Self {
        Self::build(job_id, Some(repo), refresh)
    }

    /// Token that only trips through [`CancellationToken::cancel`].
    pub fn detached(job_id: JobId) -> Self {
        Self::build(job_id, None, Duration::MAX)
    }

    fn build(job_id: JobId, repo: Option<Arc<dyn JobRepository>>, refresh: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                job_id,
                repo,
                refresh,
                cancelled: AtomicBool::new(false),
                checked_at: Mutex::new(None),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Last known state, without touching the repository.
    pub fn is_cancelled_cached(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Current state, refreshing from the repository when the cache is stale.
    pub async fn is_cancelled(&self) -> bool {
        if self.is_cancelled_cached() {
            return true;
        }
        if self.is_stale() {
            self.refresh().await;
        }
        self.is_cancelled_cached()
    }

    /// Fail with [`StageError::Cancelled`] once cancellation was requested.
    pub async fn checkpoint(&self) -> Result<(), StageError> {
        if self.is_cancelled().await {
            debug!(job_id = %self.inner.job_id, "Cancellation observed at checkpoint");
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    fn is_stale(&self) -> bool {
        if self.inner.repo.is_none() {
            return false;
        }
        let checked_at = self
            .inner
            .checked_at
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        checked_at.map_or(true, |at| at.elapsed() >= self.inner.refresh)
    }

    /// Re-read the flag from the repository. Read errors keep the cached
    /// value.
    pub async fn refresh(&self) {
        let Some(repo) = &self.inner.repo else {
            return;
        };
        match repo.get(&self.inner.job_id).await {
            Ok(job) => {
                if job.cancel_requested || job.status == JobStatus::Cancelled {
                    self.cancel();
                }
            }
            Err(e) => {
                warn!(job_id = %self.inner.job_id, "Failed to refresh cancellation flag: {}", e);
            }
        }
        *self
            .inner
            .checked_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// Keep the cached flag fresh in the background, for blocking work that
    /// can only read [`CancellationToken::is_cancelled_cached`]. The task
    /// stops when the guard is dropped.
    pub fn spawn_refresher(&self) -> RefresherGuard {
        let token = self.clone();
        let period = self.inner.refresh.max(MIN_BACKGROUND_REFRESH);
        let handle = tokio::spawn(async move {
            if token.inner.repo.is_none() {
                return;
            }
            loop {
                tokio::time::sleep(period).await;
                token.refresh().await;
                if token.is_cancelled_cached() {
                    break;
                }
            }
        });
        RefresherGuard(handle)
    }
}

/// Aborts the background refresher on drop.
#[derive(Debug)]
pub struct RefresherGuard(JoinHandle<()>);

impl Drop for RefresherGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
