//! Candidate scoring.

use std::collections::HashSet;
use std::sync::Arc;

use reframe_models::SegmentCandidate;

/// Weights applied to each feature; the score is their weighted sum.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWeights {
    pub keyword: f64,
    pub lexical: f64,
    pub sentiment: f64,
    pub duration: f64,
    /// Weight of the relevance scorer. [`GuidanceCoverage`] by default;
    /// zero leaves it off
    pub relevance: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            keyword: 1.0,
            lexical: 0.5,
            sentiment: 0.5,
            duration: 1.0,
            relevance: 1.0,
        }
    }
}

/// Preferred clip length band, in seconds.
pub const PREFERRED_DURATION: (f64, f64) = (15.0, 60.0);

const EMPHASIS: &[&str] = &[
    "amazing", "incredible", "never", "always", "secret", "best", "worst", "biggest", "actually",
    "literally", "huge", "insane", "crazy", "important", "must", "wow",
];

const POSITIVE: &[&str] = &[
    "love", "great", "awesome", "happy", "excellent", "beautiful", "win", "success", "fantastic",
    "perfect", "brilliant", "excited", "fun", "good",
];

const NEGATIVE: &[&str] = &[
    "hate", "terrible", "awful", "sad", "fail", "failure", "angry", "disaster", "horrible", "wrong",
    "bad", "afraid", "pain", "lost",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "about", "into", "your", "have", "what", "when",
    "where", "which", "there", "their", "would", "could", "should", "make", "some", "more",
];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Per-request scoring inputs shared by all candidates.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    /// Lowercased terms from the guidance text and configured keywords
    pub terms: HashSet<String>,
}

impl ScoringContext {
    pub fn new(guidance: Option<&str>, keywords: &[String]) -> Self {
        let mut terms: HashSet<String> = guidance
            .map(|g| {
                words(g)
                    .filter(|w| w.chars().count() >= 4 && !STOPWORDS.contains(&w.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        for keyword in keywords {
            terms.extend(words(keyword));
        }
        Self { terms }
    }
}

/// Scores one candidate. Returns the score and a short human-readable reason.
pub trait SegmentScorer: Send + Sync {
    fn score(&self, candidate: &SegmentCandidate, context: &ScoringContext, guidance: Option<&str>) -> (f64, String);
}

/// Feature values for one candidate, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Features {
    pub keyword: f64,
    pub lexical: f64,
    pub sentiment: f64,
    pub duration: f64,
}

impl Features {
    pub fn extract(candidate: &SegmentCandidate, context: &ScoringContext) -> Self {
        let tokens: Vec<String> = words(&candidate.snippet).collect();
        let count = tokens.len().max(1) as f64;

        let keyword_hits = tokens.iter().filter(|t| context.terms.contains(*t)).count() as f64;
        let emphasis = tokens.iter().filter(|t| EMPHASIS.contains(&t.as_str())).count() as f64;
        let marks = candidate
            .snippet
            .chars()
            .filter(|c| matches!(c, '!' | '?'))
            .count() as f64;
        let positive = tokens.iter().filter(|t| POSITIVE.contains(&t.as_str())).count() as f64;
        let negative = tokens.iter().filter(|t| NEGATIVE.contains(&t.as_str())).count() as f64;

        Self {
            keyword: (keyword_hits * 10.0 / count).min(1.0),
            lexical: ((emphasis + marks) * 10.0 / count).min(1.0),
            sentiment: ((positive + negative) * 10.0 / count).min(1.0),
            duration: duration_fit(candidate.duration()),
        }
    }
}

/// 1.0 inside the preferred band, decaying proportionally outside it.
pub fn duration_fit(duration: f64) -> f64 {
    let (low, high) = PREFERRED_DURATION;
    if duration <= 0.0 {
        0.0
    } else if duration < low {
        duration / low
    } else if duration > high {
        high / duration
    } else {
        1.0
    }
}

/// Relevance as the share of distinct guidance and keyword terms a
/// candidate mentions at least once.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuidanceCoverage;

impl SegmentScorer for GuidanceCoverage {
    fn score(&self, candidate: &SegmentCandidate, context: &ScoringContext, _guidance: Option<&str>) -> (f64, String) {
        if context.terms.is_empty() {
            return (0.0, String::new());
        }
        let seen: HashSet<String> = words(&candidate.snippet)
            .filter(|w| context.terms.contains(w))
            .collect();
        if seen.is_empty() {
            return (0.0, String::new());
        }
        let total = context.terms.len();
        (
            seen.len() as f64 / total as f64,
            format!("covers {}/{} guidance terms", seen.len(), total),
        )
    }
}

/// Weighted sum of the built-in features, plus an optional relevance scorer.
#[derive(Clone)]
pub struct HeuristicScorer {
    weights: FeatureWeights,
    relevance: Option<Arc<dyn SegmentScorer>>,
}

impl HeuristicScorer {
    pub fn new(weights: FeatureWeights) -> Self {
        Self {
            weights,
            relevance: None,
        }
    }

    pub fn with_relevance(mut self, scorer: Arc<dyn SegmentScorer>) -> Self {
        self.relevance = Some(scorer);
        self
    }
}

impl SegmentScorer for HeuristicScorer {
    fn score(&self, candidate: &SegmentCandidate, context: &ScoringContext, guidance: Option<&str>) -> (f64, String) {
        let f = Features::extract(candidate, context);
        let w = &self.weights;
        let mut parts = vec![
            ("keywords", w.keyword * f.keyword),
            ("lexical", w.lexical * f.lexical),
            ("sentiment", w.sentiment * f.sentiment),
            ("duration", w.duration * f.duration),
        ];

        let mut relevance_reason = None;
        if let Some(scorer) = &self.relevance {
            let (value, reason) = scorer.score(candidate, context, guidance);
            let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
            parts.push(("relevance", w.relevance * value));
            relevance_reason = Some(reason).filter(|r| !r.is_empty());
        }

        let total: f64 = parts.iter().map(|(_, v)| v).sum();
        parts.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut reason = parts
            .iter()
            .filter(|(_, v)| *v > 0.0)
            .take(2)
            .map(|(name, v)| format!("{name} {v:.2}"))
            .collect::<Vec<_>>()
            .join(", ");
        if let Some(extra) = relevance_reason {
            reason = if reason.is_empty() { extra } else { format!("{reason}; {extra}") };
        }
        (total, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(snippet: &str, start: f64, end: f64) -> SegmentCandidate {
        let mut c = SegmentCandidate::new(start, end);
        c.snippet = snippet.to_string();
        c
    }

    #[test]
    fn test_duration_fit_band() {
        assert_eq!(duration_fit(30.0), 1.0);
        assert_eq!(duration_fit(15.0), 1.0);
        assert_eq!(duration_fit(7.5), 0.5);
        assert_eq!(duration_fit(120.0), 0.5);
    }

    #[test]
    fn test_guidance_terms_drive_keyword_feature() {
        let context = ScoringContext::new(Some("Find the parts about rockets"), &["launch".to_string()]);
        assert!(context.terms.contains("rockets"));
        assert!(context.terms.contains("launch"));
        assert!(!context.terms.contains("the"));

        let on_topic = Features::extract(&candidate("the rockets launch today", 0.0, 20.0), &context);
        let off_topic = Features::extract(&candidate("we talk about weather", 0.0, 20.0), &context);
        assert!(on_topic.keyword > off_topic.keyword);
        assert_eq!(off_topic.keyword, 0.0);
    }

    #[test]
    fn test_weights_are_applied() {
        let context = ScoringContext::default();
        let c = candidate("plain words here", 0.0, 30.0);
        let base = HeuristicScorer::new(FeatureWeights::default()).score(&c, &context, None).0;
        let doubled = HeuristicScorer::new(FeatureWeights {
            duration: 2.0,
            ..FeatureWeights::default()
        })
        .score(&c, &context, None)
        .0;
        assert_eq!(base, 1.0);
        assert_eq!(doubled, 2.0);
    }

    #[test]
    fn test_excited_text_scores_higher() {
        let scorer = HeuristicScorer::new(FeatureWeights::default());
        let context = ScoringContext::default();
        let calm = scorer.score(&candidate("we walked to the shop", 0.0, 20.0), &context, None);
        let excited = scorer.score(&candidate("this is amazing! I love it!", 0.0, 20.0), &context, None);
        assert!(excited.0 > calm.0);
        assert!(excited.1.contains("lexical") || excited.1.contains("sentiment"));
    }

    struct Relevance;

    impl SegmentScorer for Relevance {
        fn score(&self, _: &SegmentCandidate, _: &ScoringContext, guidance: Option<&str>) -> (f64, String) {
            (0.5, format!("matches {:?}", guidance.unwrap_or("")))
        }
    }

    #[test]
    fn test_guidance_coverage_counts_distinct_terms() {
        let context = ScoringContext::new(Some("rockets and satellites"), &["launch".to_string()]);
        let (half, reason) = GuidanceCoverage.score(
            &candidate("launch launch launch the rockets", 0.0, 20.0),
            &context,
            None,
        );
        assert!((half - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(reason, "covers 2/3 guidance terms");

        let (none, reason) = GuidanceCoverage.score(&candidate("weather", 0.0, 20.0), &context, None);
        assert_eq!(none, 0.0);
        assert!(reason.is_empty());
        assert_eq!(
            GuidanceCoverage.score(&candidate("launch", 0.0, 20.0), &ScoringContext::default(), None).0,
            0.0
        );
    }

    #[test]
    fn test_relevance_scorer_adds_weighted_value() {
        let scorer = HeuristicScorer::new(FeatureWeights::default()).with_relevance(Arc::new(Relevance));
        let (score, reason) = scorer.score(&candidate("plain", 0.0, 30.0), &ScoringContext::default(), Some("x"));
        assert_eq!(score, 1.5);
        assert!(reason.ends_with("matches \"x\""));
    }
}
