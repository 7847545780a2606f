//! Repository metrics.

use metrics::{counter, histogram};

pub mod names {
    /// Repository operations by backend, operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "reframe_repo_operations_total";

    /// Lost compare-and-set races that were retried.
    pub const CAS_CONFLICTS_TOTAL: &str = "reframe_repo_cas_conflicts_total";

    /// Retries issued by `with_retry`.
    pub const RETRIES_TOTAL: &str = "reframe_repo_retries_total";

    pub const LATENCY_SECONDS: &str = "reframe_repo_latency_seconds";
}

/// Record a completed repository operation.
pub fn record_operation(backend: &'static str, operation: &'static str, ok: bool, latency_secs: f64) {
    counter!(
        names::OPERATIONS_TOTAL,
        "backend" => backend,
        "operation" => operation,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "backend" => backend,
        "operation" => operation
    )
    .record(latency_secs);
}

pub fn record_cas_conflict(operation: &'static str) {
    counter!(names::CAS_CONFLICTS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}
