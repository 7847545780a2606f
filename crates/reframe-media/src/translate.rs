//! Text translation engines and subtitle translation.

use async_trait::async_trait;
use reframe_models::TranslatorBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engines::EngineConfig;
use crate::error::{MediaError, MediaResult};
use crate::subtitles::SubtitleLine;

/// Lines sent per translation request.
const BATCH_SIZE: usize = 64;

/// Separator between original and translated text in bilingual output.
pub const BILINGUAL_SEPARATOR: &str = "\\N";

/// Translation engine. Output is order- and count-preserving.
#[async_trait]
pub trait Translator: Send + Sync {
    fn backend(&self) -> TranslatorBackend;

    async fn translate_batch(&self, texts: &[String], src: &str, tgt: &str) -> MediaResult<Vec<String>>;
}

/// Returns every text unchanged.
#[derive(Debug, Clone, Default)]
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    fn backend(&self) -> TranslatorBackend {
        TranslatorBackend::Noop
    }

    async fn translate_batch(&self, texts: &[String], _src: &str, _tgt: &str) -> MediaResult<Vec<String>> {
        Ok(texts.to_vec())
    }
}

/// LibreTranslate-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct LibreTranslator {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct LibreRequest<'a> {
    q: &'a [String],
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LibreText {
    Many(Vec<String>),
    One(String),
}

#[derive(Debug, Deserialize)]
struct LibreResponse {
    #[serde(rename = "translatedText")]
    translated_text: LibreText,
}

impl LibreTranslator {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Translator for LibreTranslator {
    fn backend(&self) -> TranslatorBackend {
        TranslatorBackend::Libre
    }

    async fn translate_batch(&self, texts: &[String], src: &str, tgt: &str) -> MediaResult<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(format!("{}/translate", self.base_url))
            .json(&LibreRequest {
                q: texts,
                source: src,
                target: tgt,
                format: "text",
                api_key: self.api_key.as_deref(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", body.chars().take(300).collect::<String>());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                MediaError::unavailable("libretranslate", message)
            } else {
                MediaError::rejected("libretranslate", message)
            });
        }

        let translated = match response.json::<LibreResponse>().await?.translated_text {
            LibreText::Many(texts) => texts,
            LibreText::One(text) => vec![text],
        };
        if translated.len() != texts.len() {
            return Err(MediaError::CountMismatch {
                expected: texts.len(),
                actual: translated.len(),
            });
        }
        debug!(count = texts.len(), src, tgt, "Translated batch");
        Ok(translated)
    }
}

/// Build the translator for `backend`. Offline mode always yields the noop
/// translator; the second value explains any fallback.
pub fn build_translator(
    backend: TranslatorBackend,
    config: &EngineConfig,
) -> (Box<dyn Translator>, Option<String>) {
    match backend {
        TranslatorBackend::Noop => (Box::new(NoopTranslator), None),
        TranslatorBackend::Libre if config.offline_mode => {
            warn!("Offline mode refuses libretranslate; using noop translator");
            (
                Box::new(NoopTranslator),
                Some("offline mode refuses the libre backend; text left untranslated".to_string()),
            )
        }
        TranslatorBackend::Libre => match config.http_client() {
            Ok(http) => (
                Box::new(LibreTranslator::new(
                    http,
                    config.libretranslate_url.clone(),
                    config.libretranslate_api_key.clone(),
                )),
                None,
            ),
            Err(e) => {
                warn!("HTTP client unavailable: {}; using noop translator", e);
                (
                    Box::new(NoopTranslator),
                    Some(format!("HTTP client unavailable ({e}); text left untranslated")),
                )
            }
        },
    }
}

/// Translate subtitle lines, keeping their timing.
///
/// With `bilingual`, each line shows the original above the translation.
pub async fn translate_lines(
    lines: &[SubtitleLine],
    translator: &dyn Translator,
    src: &str,
    tgt: &str,
    bilingual: bool,
) -> MediaResult<Vec<SubtitleLine>> {
    let texts: Vec<String> = lines.iter().map(SubtitleLine::text).collect();

    let mut translated = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(BATCH_SIZE) {
        let out = translator.translate_batch(chunk, src, tgt).await?;
        if out.len() != chunk.len() {
            return Err(MediaError::CountMismatch {
                expected: chunk.len(),
                actual: out.len(),
            });
        }
        translated.extend(out);
    }

    Ok(lines
        .iter()
        .zip(texts.iter().zip(translated))
        .map(|(line, (original, text))| {
            let text = if bilingual {
                format!("{original}{BILINGUAL_SEPARATOR}{text}")
            } else {
                text
            };
            SubtitleLine::from_text(text, line.start, line.end)
        })
        .collect())
}
