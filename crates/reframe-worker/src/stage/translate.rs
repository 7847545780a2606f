//! translate: translate an SRT or VTT file, keeping its timing and format.

use std::sync::Arc;

use async_trait::async_trait;
use reframe_media::{build_translator, subtitles, translate_lines, EngineConfig, Translator};
use reframe_models::{AssetKind, StageName, SubtitleFormat, TranslateOptions};

use super::{OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput};

pub struct TranslateExecutor {
    engines: EngineConfig,
    translator: Option<Arc<dyn Translator>>,
}

impl TranslateExecutor {
    pub fn new(engines: EngineConfig) -> Self {
        Self {
            engines,
            translator: None,
        }
    }

    /// Always use `translator`, ignoring the configured backend.
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }
}

#[async_trait]
impl StageExecutor for TranslateExecutor {
    fn stage(&self) -> StageName {
        StageName::Translate
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let options: TranslateOptions = ctx.options()?;
        let input = inputs.input(0)?;
        let format = match SubtitleFormat::from_extension(input.asset.extension()) {
            Some(f @ (SubtitleFormat::Srt | SubtitleFormat::Vtt)) if input.asset.kind == AssetKind::Subtitle => f,
            _ => {
                return Err(StageError::validation(format!(
                    "translate needs an .srt or .vtt subtitle, got .{}",
                    input.asset.extension()
                )))
            }
        };

        let bytes = tokio::fs::read(input.path()).await?;
        let text = String::from_utf8(bytes).map_err(|_| StageError::validation("subtitle file is not valid UTF-8"))?;
        let lines = subtitles::parse(&text, format)?;

        let mut warnings = Vec::new();
        let translator: Arc<dyn Translator> = match &self.translator {
            Some(t) => t.clone(),
            None => {
                let backend = options.backend.unwrap_or(self.engines.translator_backend);
                let (translator, fallback) = build_translator(backend, &self.engines);
                if let Some(reason) = fallback {
                    ctx.logger.log_warning(&reason);
                    warnings.push(reason);
                }
                Arc::from(translator)
            }
        };

        ctx.cancel.checkpoint().await?;
        ctx.progress
            .message(format!(
                "Translating {} lines {} -> {}",
                lines.len(),
                options.source_language,
                options.target_language
            ))
            .await;
        let translated = translate_lines(
            &lines,
            translator.as_ref(),
            &options.source_language,
            &options.target_language,
            options.bilingual,
        )
        .await?;
        ctx.progress.report(0.9).await;

        let artifact = OutputArtifact::text(
            subtitles::render(&translated, format),
            AssetKind::Subtitle,
            format.mime(),
            format.extension(),
        )
        .with_duration(input.asset.duration);
        let asset = ctx.store_output(None, artifact).await?;
        Ok(StageOutput::new(vec![asset]).with_warnings(warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testing::Harness;
    use reframe_media::MediaResult;
    use reframe_models::{JobType, TranslatorBackend};
    use reframe_storage::AssetStore;

    struct Shouting;

    #[async_trait]
    impl Translator for Shouting {
        fn backend(&self) -> TranslatorBackend {
            TranslatorBackend::Noop
        }

        async fn translate_batch(&self, texts: &[String], _: &str, _: &str) -> MediaResult<Vec<String>> {
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    const VTT: &str = "WEBVTT\n\n00:00:01.000 --> 00:00:02.500\nhello there\n\n00:00:03.000 --> 00:00:04.000\nbye\n";

    #[tokio::test]
    async fn test_translates_vtt_into_vtt() {
        let h = Harness::new();
        let vtt = h.upload(VTT.as_bytes(), AssetKind::Subtitle, "text/vtt").await;
        let job = h
            .job(JobType::Translate, vec![vtt], serde_json::json!({"target_language": "es", "bilingual": true}))
            .await;

        let executor = TranslateExecutor::new(EngineConfig::default()).with_translator(Arc::new(Shouting));
        let ctx = h.context(&job, StageName::Translate);
        let output = executor.execute(&ctx, h.inputs(&job).await).await.unwrap();

        let asset = &output.assets[0];
        assert_eq!(asset.extension(), "vtt");
        let text = String::from_utf8(h.store.read(&asset.id).await.unwrap()).unwrap();
        assert!(text.starts_with("WEBVTT"));
        assert!(text.contains("00:00:01.000 --> 00:00:02.500"));
        assert!(text.contains("hello there\\NHELLO THERE"));
    }

    #[tokio::test]
    async fn test_rejects_non_subtitle_input() {
        let h = Harness::new();
        let video = h.upload(b"video", AssetKind::Video, "video/mp4").await;
        let job = h
            .job(JobType::Translate, vec![video], serde_json::json!({"target_language": "es"}))
            .await;

        let executor = TranslateExecutor::new(EngineConfig::default());
        let ctx = h.context(&job, StageName::Translate);
        let err = executor.execute(&ctx, h.inputs(&job).await).await.unwrap_err();
        assert!(matches!(err, StageError::Validation(_)));
    }
}
