//! Redis-backed job repository.
//!
//! Key layout under the configured prefix:
//! - `{prefix}job:{id}` hash with `doc` (JSON) and `version`
//! - `{prefix}jobs:by_created` sorted set of ids scored by creation time
//! - `{prefix}dedupe:{key}` string holding the job id
//!
//! Writes are compare-and-set on `version` through Lua scripts; a lost race
//! reloads the job and re-applies the transition.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use reframe_models::{Job, JobError, JobId, NewJob, StageResult};
use tracing::{debug, info, warn};

use crate::error::{RepoError, RepoResult};
use crate::metrics::{record_cas_conflict, record_operation};
use crate::repository::{JobFilter, JobRepository};

const MAX_CAS_RETRIES: u32 = 8;

/// Creates the job unless the dedupe key is bound. Returns the id that owns
/// the dedupe key.
const CREATE_SCRIPT: &str = r#"
if ARGV[5] == '1' then
  local existing = redis.call('GET', KEYS[3])
  if existing then
    return existing
  end
  redis.call('SET', KEYS[3], ARGV[4])
end
redis.call('HSET', KEYS[1], 'doc', ARGV[1], 'version', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
return ARGV[4]
"#;

/// Replaces the document when the stored version still matches.
const CAS_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'version') == ARGV[1] then
  redis.call('HSET', KEYS[1], 'doc', ARGV[2], 'version', ARGV[3])
  return 1
end
return 0
"#;

/// Removes the job, its index entry and its dedupe binding.
const DELETE_SCRIPT: &str = r#"
local removed = redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
if ARGV[2] == '1' and redis.call('GET', KEYS[3]) == ARGV[1] then
  redis.call('DEL', KEYS[3])
end
return removed
"#;

/// Job repository stored in Redis.
pub struct RedisJobRepository {
    client: redis::Client,
    prefix: String,
    create_script: Script,
    cas_script: Script,
    delete_script: Script,
}

impl RedisJobRepository {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> RepoResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            prefix: prefix.into(),
            create_script: Script::new(CREATE_SCRIPT),
            cas_script: Script::new(CAS_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}job:{}", self.prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}jobs:by_created", self.prefix)
    }

    fn dedupe_key(&self, key: &str) -> String {
        format!("{}dedupe:{}", self.prefix, key)
    }

    async fn connection(&self) -> RepoResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: &JobId) -> RepoResult<Option<Job>> {
        let doc: Option<String> = redis::cmd("HGET")
            .arg(self.job_key(id))
            .arg("doc")
            .query_async(conn)
            .await?;
        match doc {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn load_many(&self, conn: &mut MultiplexedConnection, ids: &[String]) -> RepoResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HGET").arg(self.job_key(&JobId::from(id.as_str()))).arg("doc");
        }
        let docs: Vec<Option<String>> = pipe.query_async(conn).await?;

        let mut jobs = Vec::with_capacity(docs.len());
        for doc in docs.into_iter().flatten() {
            jobs.push(serde_json::from_str(&doc)?);
        }
        Ok(jobs)
    }

    /// Read, transition and compare-and-set until the write lands.
    async fn update<F>(&self, id: &JobId, operation: &'static str, mut transition: F) -> RepoResult<Job>
    where
        F: FnMut(&mut Job) -> RepoResult<()> + Send,
    {
        let started = Instant::now();
        let result: RepoResult<Job> = async {
            let mut conn = self.connection().await?;

            for attempt in 0..MAX_CAS_RETRIES {
                let mut job = self
                    .load(&mut conn, id)
                    .await?
                    .ok_or_else(|| RepoError::not_found(id))?;
                let expected_version = job.version;

                transition(&mut job)?;
                if job.version == expected_version {
                    // Nothing changed.
                    return Ok(job);
                }

                let written: i32 = self
                    .cas_script
                    .key(self.job_key(id))
                    .arg(expected_version.to_string())
                    .arg(serde_json::to_string(&job)?)
                    .arg(job.version.to_string())
                    .invoke_async(&mut conn)
                    .await?;
                if written == 1 {
                    return Ok(job);
                }

                debug!(job_id = %id, operation, attempt = attempt + 1, "Version conflict, reloading job");
                record_cas_conflict(operation);
                tokio::time::sleep(Duration::from_millis(5 * (attempt as u64 + 1))).await;
            }

            warn!(job_id = %id, operation, "Job update lost {} version races", MAX_CAS_RETRIES);
            Err(RepoError::conflict(format!(
                "{} on job {} lost {} version races",
                operation, id, MAX_CAS_RETRIES
            )))
        }
        .await;

        record_operation("redis", operation, result.is_ok(), started.elapsed().as_secs_f64());
        result
    }
}

#[async_trait]
impl JobRepository for RedisJobRepository {
    async fn create(&self, request: NewJob) -> RepoResult<Job> {
        let started = Instant::now();
        let mut conn = self.connection().await?;

        for _ in 0..2 {
            let job = Job::from_request(request.clone());
            let has_dedupe = job.dedupe_key.is_some();
            let dedupe_key = self.dedupe_key(job.dedupe_key.as_deref().unwrap_or(""));

            let owner: String = self
                .create_script
                .key(self.job_key(&job.id))
                .key(self.index_key())
                .key(&dedupe_key)
                .arg(serde_json::to_string(&job)?)
                .arg(job.version.to_string())
                .arg(job.created_at.timestamp_millis())
                .arg(job.id.as_str())
                .arg(if has_dedupe { "1" } else { "0" })
                .invoke_async(&mut conn)
                .await?;

            if owner == job.id.as_str() {
                info!(job_id = %job.id, job_type = %job.job_type, stages = job.stages.len(), "Created job");
                record_operation("redis", "create", true, started.elapsed().as_secs_f64());
                return Ok(job);
            }

            match self.load(&mut conn, &JobId::from(owner.as_str())).await? {
                Some(existing) if existing.payload_fingerprint == job.payload_fingerprint => {
                    debug!(job_id = %existing.id, "Returning deduplicated job");
                    return Ok(existing);
                }
                Some(_) => {
                    return Err(RepoError::DedupeConflict(
                        job.dedupe_key.unwrap_or_default(),
                    ))
                }
                None => {
                    // Binding outlived its job; drop it and try once more.
                    let _: () = redis::cmd("DEL").arg(&dedupe_key).query_async(&mut conn).await?;
                }
            }
        }

        Err(RepoError::conflict("dedupe key kept being rebound"))
    }

    async fn get(&self, id: &JobId) -> RepoResult<Job> {
        let mut conn = self.connection().await?;
        self.load(&mut conn, id)
            .await?
            .ok_or_else(|| RepoError::not_found(id))
    }

    async fn begin_attempt(&self, id: &JobId, expected_stage_index: usize) -> RepoResult<Job> {
        self.update(id, "begin_attempt", |job| {
            job.begin_attempt(expected_stage_index)?;
            Ok(())
        })
        .await
    }

    async fn advance(
        &self,
        id: &JobId,
        expected_stage_index: usize,
        result: StageResult,
    ) -> RepoResult<Job> {
        self.update(id, "advance", |job| Ok(job.advance(expected_stage_index, &result)?))
            .await
    }

    async fn fail(&self, id: &JobId, expected_stage_index: usize, error: JobError) -> RepoResult<Job> {
        self.update(id, "fail", |job| Ok(job.fail(expected_stage_index, error.clone())?))
            .await
    }

    async fn cancel(&self, id: &JobId) -> RepoResult<Job> {
        self.update(id, "cancel", |job| Ok(job.cancel()?)).await
    }

    async fn request_cancel(&self, id: &JobId) -> RepoResult<Job> {
        self.update(id, "request_cancel", |job| Ok(job.request_cancel()?))
            .await
    }

    async fn update_progress(&self, id: &JobId, value: f64) -> RepoResult<Job> {
        self.update(id, "update_progress", |job| {
            job.update_progress(value);
            Ok(())
        })
        .await
    }

    async fn list(&self, filter: &JobFilter) -> RepoResult<Vec<Job>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(self.index_key())
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for chunk in ids.chunks(100) {
            for job in self.load_many(&mut conn, chunk).await? {
                if filter.matches(&job) {
                    jobs.push(job);
                    if jobs.len() >= filter.limit {
                        return Ok(jobs);
                    }
                }
            }
        }
        Ok(jobs)
    }

    async fn list_expired(&self, before: DateTime<Utc>) -> RepoResult<Vec<Job>> {
        let mut conn = self.connection().await?;
        // A job updated before the cutoff was also created before it.
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.index_key())
            .arg("-inf")
            .arg(before.timestamp_millis())
            .query_async(&mut conn)
            .await?;

        let mut expired = Vec::new();
        for chunk in ids.chunks(100) {
            expired.extend(
                self.load_many(&mut conn, chunk)
                    .await?
                    .into_iter()
                    .filter(|job| job.is_terminal() && job.updated_at < before),
            );
        }
        Ok(expired)
    }

    async fn delete(&self, id: &JobId) -> RepoResult<bool> {
        let mut conn = self.connection().await?;
        let dedupe = self
            .load(&mut conn, id)
            .await?
            .and_then(|job| job.dedupe_key);

        let removed: i32 = self
            .delete_script
            .key(self.job_key(id))
            .key(self.index_key())
            .key(self.dedupe_key(dedupe.as_deref().unwrap_or("")))
            .arg(id.as_str())
            .arg(if dedupe.is_some() { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
