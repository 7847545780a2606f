//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission, listing, lookup and cancellation
//! - Asset upload, metadata and download
//! - Built-in subtitle style presets
//! - Per-IP rate limiting, request ids and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
