//! Non-overlapping subset selection.

use std::cmp::Ordering;

use reframe_models::SegmentCandidate;

/// How scored candidates are reduced to the final clip set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Highest score first, skipping overlaps
    #[default]
    Greedy,
    /// Weighted interval scheduling, maximizing the total score of at most N
    /// clips
    Optimal,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::Greedy => "greedy",
            SelectionStrategy::Optimal => "optimal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greedy" => Some(SelectionStrategy::Greedy),
            "optimal" | "dp" => Some(SelectionStrategy::Optimal),
            _ => None,
        }
    }
}

fn by_start(a: &SegmentCandidate, b: &SegmentCandidate) -> Ordering {
    a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end))
}

/// Sort by score descending and accept each candidate that overlaps none
/// already accepted, stopping at `limit`. Ties go to the earlier window.
/// The result is ordered by start.
pub fn select_greedy(mut candidates: Vec<SegmentCandidate>, limit: usize) -> Vec<SegmentCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| by_start(a, b)));

    let mut accepted: Vec<SegmentCandidate> = Vec::with_capacity(limit);
    for candidate in candidates {
        if accepted.len() >= limit {
            break;
        }
        if accepted.iter().all(|a| !a.overlaps(&candidate)) {
            accepted.push(candidate);
        }
    }
    accepted.sort_by(by_start);
    accepted
}

/// Maximize the summed score of at most `limit` pairwise non-overlapping
/// candidates. Candidates with a non-positive score never help and are
/// dropped. The result is ordered by start.
pub fn select_optimal(candidates: Vec<SegmentCandidate>, limit: usize) -> Vec<SegmentCandidate> {
    let mut items: Vec<SegmentCandidate> = candidates.into_iter().filter(|c| c.score > 0.0).collect();
    if items.is_empty() || limit == 0 {
        return Vec::new();
    }
    items.sort_by(|a, b| a.end.total_cmp(&b.end).then(a.start.total_cmp(&b.start)));

    let n = items.len();
    // prev[i]: number of items (in end order) that finish at or before item i starts.
    let prev: Vec<usize> = items
        .iter()
        .map(|item| items.partition_point(|other| other.end <= item.start))
        .collect();

    // best[k][i]: best total using at most k picks among the first i items.
    let mut best = vec![vec![0.0f64; n + 1]; limit + 1];
    for k in 1..=limit {
        for i in 1..=n {
            let skip = best[k][i - 1];
            let take = best[k - 1][prev[i - 1]] + items[i - 1].score;
            best[k][i] = if take > skip { take } else { skip };
        }
    }

    let mut chosen = Vec::new();
    let (mut k, mut i) = (limit, n);
    while k > 0 && i > 0 {
        if best[k][i] == best[k][i - 1] {
            i -= 1;
        } else {
            chosen.push(i - 1);
            i = prev[i - 1];
            k -= 1;
        }
    }

    let mut out: Vec<SegmentCandidate> = chosen.into_iter().map(|idx| items[idx].clone()).collect();
    out.sort_by(by_start);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(start: f64, end: f64, score: f64) -> SegmentCandidate {
        let mut c = SegmentCandidate::new(start, end);
        c.score = score;
        c
    }

    fn scores(selected: &[SegmentCandidate]) -> Vec<f64> {
        selected.iter().map(|c| c.score).collect()
    }

    #[test]
    fn test_greedy_skips_overlapping_runner_up() {
        let candidates = vec![
            scored(100.0, 130.0, 0.9),
            scored(120.0, 150.0, 0.85),
            scored(300.0, 340.0, 0.7),
            scored(10.0, 25.0, 0.6),
        ];
        let selected = select_greedy(candidates, 3);
        // Ordered by start.
        assert_eq!(scores(&selected), vec![0.6, 0.9, 0.7]);
    }

    #[test]
    fn test_greedy_stops_at_limit() {
        let candidates = (0..10)
            .map(|i| scored(i as f64 * 20.0, i as f64 * 20.0 + 15.0, i as f64))
            .collect();
        let selected = select_greedy(candidates, 2);
        assert_eq!(scores(&selected), vec![8.0, 9.0]);
    }

    #[test]
    fn test_optimal_beats_greedy_on_total_score() {
        // Greedy takes the 1.0 window and blocks both 0.8 windows.
        let candidates = vec![
            scored(0.0, 20.0, 0.8),
            scored(10.0, 40.0, 1.0),
            scored(30.0, 50.0, 0.8),
        ];
        assert_eq!(scores(&select_greedy(candidates.clone(), 2)), vec![1.0]);
        assert_eq!(scores(&select_optimal(candidates, 2)), vec![0.8, 0.8]);
    }

    #[test]
    fn test_optimal_respects_limit() {
        let candidates = vec![
            scored(0.0, 10.0, 0.5),
            scored(10.0, 20.0, 0.5),
            scored(20.0, 30.0, 0.9),
        ];
        let selected = select_optimal(candidates, 1);
        assert_eq!(scores(&selected), vec![0.9]);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(SelectionStrategy::parse("Optimal"), Some(SelectionStrategy::Optimal));
        assert_eq!(SelectionStrategy::parse("greedy"), Some(SelectionStrategy::Greedy));
        assert_eq!(SelectionStrategy::parse("random"), None);
    }
}
