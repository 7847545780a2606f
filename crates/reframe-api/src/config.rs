//! API server settings.

use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Allowed origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Sustained requests per second per client IP on `/api/v1`
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    /// Largest accepted body, uploads included
    pub max_body_size: usize,
    /// `production` hides internal error details
    pub environment: String,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 512 * 1024 * 1024,
            environment: "development".to_string(),
            metrics_enabled: true,
        }
    }
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ApiConfig {
    /// Read `API_HOST`, `API_PORT`, `CORS_ORIGINS`, `RATE_LIMIT_RPS`,
    /// `RATE_LIMIT_BURST`, `MAX_BODY_SIZE`, `ENVIRONMENT` and `METRICS_ENABLED`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cors_origins = env::var("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);
        let metrics_enabled = env::var("METRICS_ENABLED")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.metrics_enabled);

        Self {
            host: env::var("API_HOST").unwrap_or(defaults.host),
            port: parsed("API_PORT", defaults.port),
            cors_origins,
            rate_limit_rps: parsed("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_burst: parsed("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            max_body_size: parsed("MAX_BODY_SIZE", defaults.max_body_size),
            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
