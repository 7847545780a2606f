//! Engine call metrics.

use metrics::{counter, histogram};

pub mod names {
    /// External engine invocations by engine and outcome.
    pub const ENGINE_CALLS_TOTAL: &str = "reframe_engine_calls_total";
    pub const ENGINE_DURATION_SECONDS: &str = "reframe_engine_duration_seconds";
}

/// Record one engine invocation.
pub fn record_engine_call(engine: &'static str, ok: bool, duration_secs: f64) {
    counter!(
        names::ENGINE_CALLS_TOTAL,
        "engine" => engine,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
    histogram!(names::ENGINE_DURATION_SECONDS, "engine" => engine).record(duration_secs);
}
