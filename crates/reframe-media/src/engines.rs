//! Engine selection settings shared by the ASR and translation factories.

use std::time::Duration;

use reframe_models::{AsrBackend, TranslatorBackend};

/// Which external engines to use and how to reach them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub asr_backend: AsrBackend,
    pub whisper_cpp_bin: String,
    pub whisper_cpp_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub translator_backend: TranslatorBackend,
    pub libretranslate_url: String,
    pub libretranslate_api_key: Option<String>,
    /// Refuse every networked or local engine and use the noop variants
    pub offline_mode: bool,
    /// Upper bound for a single engine call
    pub engine_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            asr_backend: AsrBackend::Noop,
            whisper_cpp_bin: "whisper-cli".to_string(),
            whisper_cpp_model: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "whisper-1".to_string(),
            translator_backend: TranslatorBackend::Noop,
            libretranslate_url: "http://localhost:5000".to_string(),
            libretranslate_api_key: None,
            offline_mode: false,
            engine_timeout: Duration::from_secs(1800),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            asr_backend: std::env::var("REFRAME_ASR_BACKEND")
                .ok()
                .and_then(|s| AsrBackend::parse(&s))
                .unwrap_or(defaults.asr_backend),
            whisper_cpp_bin: env_opt("WHISPER_CPP_BIN").unwrap_or(defaults.whisper_cpp_bin),
            whisper_cpp_model: env_opt("WHISPER_CPP_MODEL"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_base_url: env_opt("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_model: env_opt("OPENAI_TRANSCRIBE_MODEL").unwrap_or(defaults.openai_model),
            translator_backend: std::env::var("REFRAME_TRANSLATOR_BACKEND")
                .ok()
                .and_then(|s| TranslatorBackend::parse(&s))
                .unwrap_or(defaults.translator_backend),
            libretranslate_url: env_opt("LIBRETRANSLATE_URL").unwrap_or(defaults.libretranslate_url),
            libretranslate_api_key: env_opt("LIBRETRANSLATE_API_KEY"),
            offline_mode: env_flag("REFRAME_OFFLINE_MODE"),
            engine_timeout: std::env::var("REFRAME_ENGINE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_timeout),
        }
    }

    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.engine_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
    }
}
