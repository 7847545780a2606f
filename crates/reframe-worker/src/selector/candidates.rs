//! Candidate window generation.

use reframe_models::{SegmentCandidate, TranscriptSpan};

/// Upper bound on candidates per call, so very long transcripts with tiny
/// spans stay tractable.
const MAX_CANDIDATES: usize = 50_000;

/// Windows of consecutive spans whose duration lies in `[min, max]`.
///
/// Window starts are span starts at least `stride` seconds apart; each window
/// grows span by span, so no candidate splits a span. Spans are expected in
/// timeline order; empty or inverted spans are skipped.
pub fn generate_candidates(spans: &[TranscriptSpan], min: f64, max: f64, stride: f64) -> Vec<SegmentCandidate> {
    let spans: Vec<&TranscriptSpan> = spans.iter().filter(|s| s.end > s.start).collect();
    let mut out = Vec::new();
    let mut last_start: Option<f64> = None;

    for (i, first) in spans.iter().enumerate() {
        if last_start.map_or(false, |prev| first.start - prev < stride) {
            continue;
        }
        last_start = Some(first.start);

        let mut snippet = String::new();
        for span in &spans[i..] {
            let text = span.text.trim();
            if !text.is_empty() {
                if !snippet.is_empty() {
                    snippet.push(' ');
                }
                snippet.push_str(text);
            }

            let duration = span.end - first.start;
            if duration > max {
                break;
            }
            if duration >= min {
                let mut candidate = SegmentCandidate::new(first.start, span.end);
                candidate.snippet = snippet.clone();
                out.push(candidate);
                if out.len() >= MAX_CANDIDATES {
                    return out;
                }
            }
        }
    }
    out
}
