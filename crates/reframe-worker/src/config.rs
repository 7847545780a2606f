//! Worker configuration.

use std::time::Duration;

use tracing::warn;

use crate::retry::RetryPolicy;
use crate::selector::SelectorConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stage tasks processed concurrently by this process
    pub concurrency: usize,
    /// Wall-clock limit for one stage attempt
    pub stage_timeout: Duration,
    /// How long a consume call waits for new tasks
    pub consume_block: Duration,
    /// How often the worker scans for orphaned pending tasks
    pub claim_interval: Duration,
    /// Minimum idle time before a pending task can be claimed (crash recovery).
    /// Running stages refresh their lease every third of this.
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Backoff between attempts of the same stage
    pub retry: RetryPolicy,
    /// How long a cached cancellation flag stays fresh
    pub cancel_poll: Duration,
    pub retention: RetentionConfig,
    pub selector: SelectorConfig,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            stage_timeout: Duration::from_secs(1800),
            consume_block: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(7200),
            shutdown_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            cancel_poll: Duration::from_millis(2000),
            retention: RetentionConfig::default(),
            selector: SelectorConfig::default(),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.concurrency),
            stage_timeout: Duration::from_secs(
                std::env::var("WORKER_STAGE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            consume_block: defaults.consume_block,
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_min_idle: Duration::from_millis(
                std::env::var("WORKER_CLAIM_MIN_IDLE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(7_200_000),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            retry: RetryPolicy::from_env(),
            cancel_poll: Duration::from_millis(
                std::env::var("REFRAME_CANCEL_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            retention: RetentionConfig::from_env(),
            selector: SelectorConfig::from_env(),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        };
        config.with_claim_floor()
    }

    /// Longest one delivery can stay pending while its stage is healthy:
    /// every attempt running into the stage timeout, plus the backoff
    /// between attempts.
    pub fn stage_budget(&self) -> Duration {
        let attempts = self.retry.max_attempts.max(1);
        self.stage_timeout * attempts + self.retry.max_delay * (attempts - 1)
    }

    /// Interval at which a running stage refreshes its delivery lease.
    pub fn lease_heartbeat(&self) -> Duration {
        (self.claim_min_idle / 3).max(Duration::from_millis(10))
    }

    /// Raise `claim_min_idle` above [`WorkerConfig::stage_budget`], so a
    /// stage whose heartbeats fail still is not claimed while retrying.
    pub fn with_claim_floor(mut self) -> Self {
        let budget = self.stage_budget();
        if self.claim_min_idle <= budget {
            let raised = budget + self.claim_interval;
            warn!(
                configured_ms = self.claim_min_idle.as_millis() as u64,
                raised_ms = raised.as_millis() as u64,
                "Claim threshold is below the stage retry budget, raising it"
            );
            self.claim_min_idle = raised;
        }
        self
    }
}

/// Retention sweep settings.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Age after which terminal jobs, orphaned outputs and scratch
    /// directories are removed
    pub ttl: Duration,
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            interval: Duration::from_secs(3600),
        }
    }
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        Self {
            ttl: Duration::from_secs(
                std::env::var("REFRAME_RETENTION_TTL_HOURS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(24)
                    * 3600,
            ),
            interval: Duration::from_secs(
                std::env::var("REFRAME_RETENTION_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_threshold_exceeds_stage_budget() {
        let config = WorkerConfig::default();
        // 3 attempts of 1800s plus two 60s backoffs.
        assert_eq!(config.stage_budget(), Duration::from_secs(5520));
        assert!(config.claim_min_idle > config.stage_budget());
        assert_eq!(config.lease_heartbeat(), Duration::from_secs(2400));
        assert_eq!(config.retention.ttl, Duration::from_secs(86_400));

        let unchanged = config.clone().with_claim_floor();
        assert_eq!(unchanged.claim_min_idle, config.claim_min_idle);
    }

    #[test]
    fn test_low_claim_threshold_is_raised() {
        let config = WorkerConfig {
            claim_min_idle: Duration::from_secs(3600),
            ..WorkerConfig::default()
        }
        .with_claim_floor();
        assert_eq!(config.claim_min_idle, Duration::from_secs(5520 + 30));
    }
}
