//! Speech recognition engines.
//!
//! Every engine returns a [`Transcript`] of ordered, timed spans. Engines that
//! support it return one span per word so subtitle grouping and karaoke
//! timing have word boundaries to work with.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reframe_models::{AsrBackend, Transcript, TranscriptSpan};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engines::EngineConfig;
use crate::error::{MediaError, MediaResult};

/// Per-call recognition settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeConfig {
    /// ISO language code; `None` lets the engine detect it
    pub language: Option<String>,
    /// Engine-specific model override
    pub model: Option<String>,
    pub word_timestamps: bool,
    /// Media duration, used by engines that cannot measure it
    pub duration_hint: Option<f64>,
}

/// ASR engine.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn backend(&self) -> AsrBackend;

    async fn transcribe(&self, audio: &Path, config: &TranscribeConfig) -> MediaResult<Transcript>;
}

/// Seconds covered by each placeholder span.
const NOOP_SPAN_SECS: f64 = 5.0;

/// Deterministic placeholder used when no real engine is available.
#[derive(Debug, Clone, Default)]
pub struct NoopRecognizer;

#[async_trait]
impl SpeechRecognizer for NoopRecognizer {
    fn backend(&self) -> AsrBackend {
        AsrBackend::Noop
    }

    async fn transcribe(&self, _audio: &Path, config: &TranscribeConfig) -> MediaResult<Transcript> {
        let duration = config
            .duration_hint
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(NOOP_SPAN_SECS * 2.0);

        let mut spans = Vec::new();
        let mut start = 0.0;
        while start < duration {
            let end = (start + NOOP_SPAN_SECS).min(duration);
            spans.push(TranscriptSpan::new(
                format!("placeholder segment {}", spans.len() + 1),
                start,
                end,
            ));
            start = end;
        }

        Ok(Transcript {
            spans,
            language: config.language.clone(),
            backend: AsrBackend::Noop.as_str().to_string(),
            warnings: vec!["placeholder transcript; no speech engine was used".to_string()],
        })
    }
}

/// whisper.cpp through its command-line binary.
#[derive(Debug, Clone)]
pub struct WhisperCppRecognizer {
    binary: PathBuf,
    model: PathBuf,
    threads: usize,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct WhisperCppOutput {
    #[serde(default)]
    transcription: Vec<WhisperCppEntry>,
    #[serde(default)]
    result: Option<WhisperCppResult>,
}

#[derive(Debug, Deserialize)]
struct WhisperCppResult {
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperCppEntry {
    offsets: WhisperCppOffsets,
    text: String,
}

/// Milliseconds from the start of the audio.
#[derive(Debug, Deserialize)]
struct WhisperCppOffsets {
    from: u64,
    to: u64,
}

impl WhisperCppRecognizer {
    /// Locate the binary and model; fails when either is missing.
    pub fn new(binary: &str, model: impl Into<PathBuf>, timeout: Duration) -> MediaResult<Self> {
        let binary = which::which(binary).map_err(|_| MediaError::BinaryNotFound(binary.to_string()))?;
        let model = model.into();
        if !model.is_file() {
            return Err(MediaError::FileNotFound(model));
        }
        Ok(Self {
            binary,
            model,
            threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            timeout,
        })
    }

    fn parse_output(json: &[u8]) -> MediaResult<(Vec<TranscriptSpan>, Option<String>)> {
        let output: WhisperCppOutput = serde_json::from_slice(json)?;
        let spans = output
            .transcription
            .into_iter()
            .filter_map(|entry| {
                let text = entry.text.trim();
                (!text.is_empty() && entry.offsets.to > entry.offsets.from).then(|| {
                    TranscriptSpan::new(
                        text,
                        entry.offsets.from as f64 / 1000.0,
                        entry.offsets.to as f64 / 1000.0,
                    )
                })
            })
            .collect();
        Ok((spans, output.result.and_then(|r| r.language)))
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperCppRecognizer {
    fn backend(&self) -> AsrBackend {
        AsrBackend::WhisperCpp
    }

    async fn transcribe(&self, audio: &Path, config: &TranscribeConfig) -> MediaResult<Transcript> {
        let scratch = tempfile::Builder::new().prefix("reframe-asr-").tempdir()?;
        let out_base = scratch.path().join("transcript");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(config.model.as_deref().map(PathBuf::from).unwrap_or_else(|| self.model.clone()))
            .arg("-f")
            .arg(audio)
            .arg("-t")
            .arg(self.threads.to_string())
            .arg("-oj")
            .arg("-of")
            .arg(&out_base)
            .arg("-l")
            .arg(config.language.as_deref().unwrap_or("auto"));
        if config.word_timestamps {
            // One entry per token, split on word boundaries.
            cmd.args(["-ml", "1", "-sow"]);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(binary = %self.binary.display(), audio = %audio.display(), "Running whisper.cpp");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| MediaError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::rejected(
                "whisper-cpp",
                stderr.lines().last().unwrap_or("non-zero exit").to_string(),
            ));
        }

        let json = tokio::fs::read(out_base.with_extension("json")).await?;
        let (spans, detected) = Self::parse_output(&json)?;
        info!(spans = spans.len(), "whisper.cpp transcription finished");

        Ok(Transcript {
            spans,
            language: config.language.clone().or(detected),
            backend: AsrBackend::WhisperCpp.as_str().to_string(),
            warnings: Vec::new(),
        })
    }
}

/// OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiRecognizer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
    #[serde(default)]
    words: Vec<VerboseWord>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct VerboseWord {
    word: String,
    start: f64,
    end: f64,
}

impl OpenAiRecognizer {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn spans_from(response: VerboseTranscription, word_timestamps: bool) -> Vec<TranscriptSpan> {
        let words: Vec<TranscriptSpan> = response
            .words
            .into_iter()
            .filter(|w| !w.word.trim().is_empty() && w.end > w.start)
            .map(|w| TranscriptSpan::new(w.word.trim(), w.start, w.end))
            .collect();
        if word_timestamps && !words.is_empty() {
            return words;
        }

        let segments: Vec<TranscriptSpan> = response
            .segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| TranscriptSpan::new(s.text.trim(), s.start, s.end))
            .collect();
        if !segments.is_empty() {
            return segments;
        }
        if !words.is_empty() {
            return words;
        }

        // Plain text only: one span over the whole file.
        match (response.text.trim(), response.duration) {
            ("", _) => Vec::new(),
            (text, duration) => vec![TranscriptSpan::new(text, 0.0, duration.unwrap_or(0.0))],
        }
    }
}

#[async_trait]
impl SpeechRecognizer for OpenAiRecognizer {
    fn backend(&self) -> AsrBackend {
        AsrBackend::Openai
    }

    async fn transcribe(&self, audio: &Path, config: &TranscribeConfig) -> MediaResult<Transcript> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let file = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", config.model.clone().unwrap_or_else(|| self.model.clone()))
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");
        if config.word_timestamps {
            form = form.text("timestamp_granularities[]", "word");
        }
        if let Some(language) = &config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", body.chars().take(300).collect::<String>());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                MediaError::unavailable("openai", message)
            } else {
                MediaError::rejected("openai", message)
            });
        }

        let parsed: VerboseTranscription = response.json().await?;
        let language = config.language.clone().or_else(|| parsed.language.clone());
        let spans = Self::spans_from(parsed, config.word_timestamps);
        info!(spans = spans.len(), "OpenAI transcription finished");

        Ok(Transcript {
            spans,
            language,
            backend: AsrBackend::Openai.as_str().to_string(),
            warnings: Vec::new(),
        })
    }
}

/// Build the recognizer for `backend`, falling back to [`NoopRecognizer`]
/// when it cannot be used. The second value explains any fallback.
pub fn build_recognizer(
    backend: AsrBackend,
    config: &EngineConfig,
) -> (Box<dyn SpeechRecognizer>, Option<String>) {
    let fallback = |reason: String| -> (Box<dyn SpeechRecognizer>, Option<String>) {
        warn!(backend = backend.as_str(), "{}; using noop recognizer", reason);
        (Box::new(NoopRecognizer), Some(format!("{reason}; used noop transcript")))
    };

    if backend != AsrBackend::Noop && config.offline_mode {
        return fallback(format!("offline mode refuses the {} backend", backend.as_str()));
    }

    match backend {
        AsrBackend::Noop => (Box::new(NoopRecognizer), None),
        AsrBackend::WhisperCpp => {
            let Some(model) = config.whisper_cpp_model.clone() else {
                return fallback("WHISPER_CPP_MODEL is not set".to_string());
            };
            match WhisperCppRecognizer::new(&config.whisper_cpp_bin, model, config.engine_timeout) {
                Ok(recognizer) => (Box::new(recognizer), None),
                Err(e) => fallback(format!("whisper-cpp unavailable: {e}")),
            }
        }
        AsrBackend::Openai => match (&config.openai_api_key, config.http_client()) {
            (Some(key), Ok(http)) => (
                Box::new(OpenAiRecognizer::new(
                    http,
                    config.openai_base_url.clone(),
                    key.clone(),
                    config.openai_model.clone(),
                )),
                None,
            ),
            (None, _) => fallback("OPENAI_API_KEY is not set".to_string()),
            (_, Err(e)) => fallback(format!("HTTP client unavailable: {e}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_noop_covers_duration_hint() {
        let config = TranscribeConfig {
            duration_hint: Some(12.0),
            ..Default::default()
        };
        let transcript = NoopRecognizer
            .transcribe(Path::new("ignored.wav"), &config)
            .await
            .unwrap();
        assert_eq!(transcript.spans.len(), 3);
        assert_eq!(transcript.spans[2].start, 10.0);
        assert_eq!(transcript.spans[2].end, 12.0);
        assert_eq!(transcript.backend, "noop");
        assert!(!transcript.warnings.is_empty());
    }

    #[test]
    fn test_whisper_cpp_output_parsing() {
        let json = br#"{
            "result": {"language": "en"},
            "transcription": [
                {"timestamps": {"from": "00:00:00,000", "to": "00:00:00,420"}, "offsets": {"from": 0, "to": 420}, "text": " Hello"},
                {"timestamps": {"from": "00:00:00,420", "to": "00:00:00,420"}, "offsets": {"from": 420, "to": 420}, "text": ""},
                {"timestamps": {"from": "00:00:00,500", "to": "00:00:01,000"}, "offsets": {"from": 500, "to": 1000}, "text": " world"}
            ]
        }"#;
        let (spans, language) = WhisperCppRecognizer::parse_output(json).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0], TranscriptSpan::new("Hello", 0.0, 0.42));
        assert_eq!(spans[1].text, "world");
        assert_eq!(language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_openai_word_level_transcription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "hello world",
                "language": "english",
                "duration": 1.2,
                "segments": [{"start": 0.0, "end": 1.2, "text": " hello world"}],
                "words": [
                    {"word": "hello", "start": 0.0, "end": 0.5},
                    {"word": "world", "start": 0.6, "end": 1.2}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("a.wav");
        std::fs::write(&audio, b"RIFF").unwrap();

        let recognizer = OpenAiRecognizer::new(reqwest::Client::new(), server.uri(), "sk-test", "whisper-1");
        let config = TranscribeConfig {
            word_timestamps: true,
            ..Default::default()
        };
        let transcript = recognizer.transcribe(&audio, &config).await.unwrap();
        assert_eq!(transcript.spans.len(), 2);
        assert_eq!(transcript.spans[1].text, "world");
        assert_eq!(transcript.language.as_deref(), Some("english"));

        let config = TranscribeConfig::default();
        let spans = OpenAiRecognizer::spans_from(
            serde_json::from_value(serde_json::json!({
                "text": "hello world",
                "segments": [{"start": 0.0, "end": 1.2, "text": " hello world"}]
            }))
            .unwrap(),
            config.word_timestamps,
        );
        assert_eq!(spans, vec![TranscriptSpan::new("hello world", 0.0, 1.2)]);
    }

    #[tokio::test]
    async fn test_openai_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("a.wav");
        std::fs::write(&audio, b"RIFF").unwrap();

        let recognizer = OpenAiRecognizer::new(reqwest::Client::new(), server.uri(), "k", "whisper-1");
        let err = recognizer
            .transcribe(&audio, &TranscribeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::EngineUnavailable { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_factory_falls_back_to_noop() {
        let offline = EngineConfig {
            offline_mode: true,
            openai_api_key: Some("k".into()),
            ..EngineConfig::default()
        };
        let (recognizer, warning) = build_recognizer(AsrBackend::Openai, &offline);
        assert_eq!(recognizer.backend(), AsrBackend::Noop);
        assert!(warning.unwrap().contains("offline"));

        let (recognizer, warning) = build_recognizer(AsrBackend::Openai, &EngineConfig::default());
        assert_eq!(recognizer.backend(), AsrBackend::Noop);
        assert!(warning.unwrap().contains("OPENAI_API_KEY"));

        let (recognizer, warning) = build_recognizer(AsrBackend::Noop, &EngineConfig::default());
        assert_eq!(recognizer.backend(), AsrBackend::Noop);
        assert!(warning.is_none());
    }
}
