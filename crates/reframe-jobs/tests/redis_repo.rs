//! Redis job repository integration tests.

use std::sync::Arc;

use reframe_jobs::{JobFilter, JobRepository, RedisJobRepository, RepoError};
use reframe_models::{AssetId, JobStatus, JobType, NewJob, StageResult};

fn repo() -> RedisJobRepository {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    // Fresh namespace per test run.
    let prefix = format!("reframe:test:{}:", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));
    RedisJobRepository::new(&url, prefix).expect("Failed to create repository")
}

fn shorts() -> NewJob {
    NewJob::new(JobType::Shorts, vec![AssetId::from("video-1")])
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_create_get_and_dedupe() {
    let repo = repo();
    let a = repo.create(shorts().with_dedupe_key("k")).await.unwrap();
    let b = repo.create(shorts().with_dedupe_key("k")).await.unwrap();
    assert_eq!(a.id, b.id);

    let other = NewJob::new(JobType::Shorts, vec![AssetId::from("video-2")]).with_dedupe_key("k");
    assert!(matches!(
        repo.create(other).await,
        Err(RepoError::DedupeConflict(_))
    ));

    let loaded = repo.get(&a.id).await.unwrap();
    assert_eq!(loaded, a);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_advance_single_winner() {
    let repo = Arc::new(repo());
    let job = repo.create(shorts()).await.unwrap();
    repo.begin_attempt(&job.id, 0).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..6 {
        let repo = repo.clone();
        let id = job.id.clone();
        handles.push(tokio::spawn(async move {
            repo.advance(&id, 0, StageResult::new(vec![AssetId::from(format!("audio-{n}"))]))
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let stored = repo.get(&job.id).await.unwrap();
    assert_eq!(stored.stage_index, 1);
    assert_eq!(stored.output_asset_ids.len(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cancel_list_and_delete() {
    let repo = repo();
    let job = repo.create(shorts()).await.unwrap();
    let cancelled = repo.request_cancel(&job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let listed = repo
        .list(&JobFilter::default().with_status(JobStatus::Cancelled))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let expired = repo
        .list_expired(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);

    assert!(repo.delete(&job.id).await.unwrap());
    assert!(matches!(repo.get(&job.id).await, Err(RepoError::NotFound(_))));
}
