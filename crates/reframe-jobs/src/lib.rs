//! Durable job records for the Reframe pipeline.
//!
//! This crate provides:
//! - The `JobRepository` trait with compare-and-set stage transitions
//! - In-memory and Redis (Lua CAS on a version field) backends
//! - Retry with full-jitter backoff for repository calls
//! - `JobService`, the request-facing operations used by the API

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_repo;
pub mod repository;
pub mod retry;
pub mod service;

pub use error::{RepoError, RepoResult};
pub use memory::MemoryJobRepository;
pub use redis_repo::RedisJobRepository;
pub use repository::{build_repository, JobFilter, JobRepository, RepoBackend, RepoConfig};
pub use retry::{with_retry, RetryConfig};
pub use service::{JobService, ServiceError, ServiceResult};
