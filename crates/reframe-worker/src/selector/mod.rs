//! Shorts segment selection.
//!
//! Candidates are windows of whole transcript spans whose duration lies in
//! the requested bounds. Each is scored by a [`SegmentScorer`] and a
//! non-overlapping subset is picked by the configured [`SelectionStrategy`].
//! When nothing qualifies the bounds are widened once; an empty result is a
//! valid outcome, not an error.

mod candidates;
mod scoring;
mod strategy;

use std::sync::Arc;

use reframe_models::{JobId, SegmentCandidate, SegmentSelection, SelectedClip, ShortsOptions, TranscriptSpan};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::stage::StageError;

pub use candidates::generate_candidates;
pub use scoring::{FeatureWeights, GuidanceCoverage, HeuristicScorer, ScoringContext, SegmentScorer};
pub use strategy::{select_greedy, select_optimal, SelectionStrategy};

/// Candidates scored between cancellation checks.
const CANCEL_CHECK_EVERY: usize = 256;

/// Selector tuning.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub strategy: SelectionStrategy,
    /// Minimum seconds between consecutive window starts
    pub stride: f64,
    pub weights: FeatureWeights,
    /// Candidates scoring below this are never selected
    pub min_score: f64,
    /// Fallback bounds are `[min / widen_factor, max * widen_factor]`
    pub widen_factor: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Greedy,
            stride: 2.0,
            weights: FeatureWeights::default(),
            min_score: 0.0,
            widen_factor: 2.0,
        }
    }
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).filter(|v: &f64| v.is_finite())
}

impl SelectorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let w = defaults.weights.clone();
        Self {
            strategy: std::env::var("REFRAME_SELECTOR_STRATEGY")
                .ok()
                .and_then(|s| SelectionStrategy::parse(&s))
                .unwrap_or(defaults.strategy),
            stride: env_f64("REFRAME_SELECTOR_STRIDE_SECS")
                .filter(|v| *v >= 0.0)
                .unwrap_or(defaults.stride),
            weights: FeatureWeights {
                keyword: env_f64("REFRAME_SELECTOR_W_KEYWORD").unwrap_or(w.keyword),
                lexical: env_f64("REFRAME_SELECTOR_W_LEXICAL").unwrap_or(w.lexical),
                sentiment: env_f64("REFRAME_SELECTOR_W_SENTIMENT").unwrap_or(w.sentiment),
                duration: env_f64("REFRAME_SELECTOR_W_DURATION").unwrap_or(w.duration),
                relevance: env_f64("REFRAME_SELECTOR_W_RELEVANCE").unwrap_or(w.relevance),
            },
            min_score: env_f64("REFRAME_SELECTOR_MIN_SCORE").unwrap_or(defaults.min_score),
            widen_factor: env_f64("REFRAME_SELECTOR_WIDEN_FACTOR")
                .filter(|v| *v >= 1.0)
                .unwrap_or(defaults.widen_factor),
        }
    }
}

/// Picks shorts clips from a transcript.
#[derive(Clone)]
pub struct SegmentSelector {
    config: SelectorConfig,
    scorer: Arc<dyn SegmentScorer>,
}

impl SegmentSelector {
    /// Selector using the heuristic scorer with the configured weights.
    /// Guidance coverage is attached as the relevance scorer unless its
    /// weight is zero.
    pub fn new(config: SelectorConfig) -> Self {
        let mut scorer = HeuristicScorer::new(config.weights.clone());
        if config.weights.relevance > 0.0 {
            scorer = scorer.with_relevance(Arc::new(GuidanceCoverage));
        }
        Self {
            config,
            scorer: Arc::new(scorer),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SegmentScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Select up to `options.max_clips` non-overlapping clips, ordered by
    /// start and tagged `{job_id}-clip-{n}`.
    ///
    /// CPU bound; run it on a blocking thread. `cancel` is read from its
    /// cache only.
    pub fn select(
        &self,
        job_id: &JobId,
        spans: &[TranscriptSpan],
        options: &ShortsOptions,
        cancel: &CancellationToken,
    ) -> Result<SegmentSelection, StageError> {
        let context = ScoringContext::new(options.guidance.as_deref(), &options.keywords);
        let mut bounds = (options.min_duration, options.max_duration);
        let mut widened = false;

        let chosen = loop {
            let scored = self.score_all(spans, bounds, &context, options.guidance.as_deref(), cancel)?;
            let eligible: Vec<SegmentCandidate> = scored
                .into_iter()
                .filter(|c| c.score >= self.config.min_score)
                .collect();
            debug!(
                job_id = %job_id,
                min = bounds.0,
                max = bounds.1,
                eligible = eligible.len(),
                "Scored segment candidates"
            );

            if !eligible.is_empty() {
                break match self.config.strategy {
                    SelectionStrategy::Greedy => select_greedy(eligible, options.max_clips),
                    SelectionStrategy::Optimal => select_optimal(eligible, options.max_clips),
                };
            }
            if widened {
                break Vec::new();
            }
            widened = true;
            bounds = (
                bounds.0 / self.config.widen_factor,
                bounds.1 * self.config.widen_factor,
            );
            info!(job_id = %job_id, min = bounds.0, max = bounds.1, "No eligible segments, widening bounds");
        };

        let reason = chosen.is_empty().then(|| {
            if spans.is_empty() {
                "transcript has no spans".to_string()
            } else {
                format!(
                    "no transcript window between {:.1}s and {:.1}s scored at least {:.2}",
                    bounds.0, bounds.1, self.config.min_score
                )
            }
        });

        let clips = chosen
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| SelectedClip {
                clip_id: format!("{}-clip-{}", job_id, i + 1),
                candidate,
            })
            .collect();

        Ok(SegmentSelection {
            clips,
            min_duration: bounds.0,
            max_duration: bounds.1,
            widened,
            reason,
        })
    }

    fn score_all(
        &self,
        spans: &[TranscriptSpan],
        (min, max): (f64, f64),
        context: &ScoringContext,
        guidance: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SegmentCandidate>, StageError> {
        let mut candidates = generate_candidates(spans, min, max, self.config.stride);
        for (i, candidate) in candidates.iter_mut().enumerate() {
            if i % CANCEL_CHECK_EVERY == 0 && cancel.is_cancelled_cached() {
                return Err(StageError::Cancelled);
            }
            let (score, reason) = self.scorer.score(candidate, context, guidance);
            candidate.score = score;
            candidate.reason = reason;
        }
        Ok(candidates)
    }
}
