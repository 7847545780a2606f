//! segment-select: pick shorts clips from the transcript.

use async_trait::async_trait;
use reframe_models::{AssetKind, SegmentSelection, ShortsOptions, StageName, Transcript};

use super::{OutputArtifact, StageContext, StageError, StageExecutor, StageInputs, StageOutput};
use crate::selector::{SegmentSelector, SelectorConfig};

pub struct SegmentSelectExecutor {
    selector: SegmentSelector,
}

impl SegmentSelectExecutor {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            selector: SegmentSelector::new(config),
        }
    }

    pub fn with_selector(selector: SegmentSelector) -> Self {
        Self { selector }
    }
}

#[async_trait]
impl StageExecutor for SegmentSelectExecutor {
    fn stage(&self) -> StageName {
        StageName::SegmentSelect
    }

    fn needs_inputs(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StageContext, inputs: StageInputs) -> Result<StageOutput, StageError> {
        let options: ShortsOptions = ctx.options()?;
        let transcript_asset = inputs.require_from_stage(StageName::Transcribe, AssetKind::Json)?;
        let transcript: Transcript = inputs.read_json(transcript_asset).await?;

        // Scoring only reads the cached flag; keep it fresh meanwhile.
        let _refresher = ctx.cancel.spawn_refresher();
        let selector = self.selector.clone();
        let cancel = ctx.cancel.clone();
        let job_id = ctx.job.id.clone();
        let selection: SegmentSelection = tokio::task::spawn_blocking(move || {
            selector.select(&job_id, &transcript.spans, &options, &cancel)
        })
        .await??;

        if let Some(reason) = &selection.reason {
            ctx.logger.log_warning(reason);
        }
        ctx.logger.log_progress(&format!(
            "Selected {} clip(s){}",
            selection.clips.len(),
            if selection.widened { " with widened bounds" } else { "" }
        ));

        let asset = ctx.store_output(None, OutputArtifact::json(&selection)?).await?;
        let warnings = selection.reason.clone().into_iter().collect();
        Ok(StageOutput::new(vec![asset]).with_warnings(warnings))
    }
}
