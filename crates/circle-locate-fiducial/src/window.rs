//! Candidate filtering and selection around the expected center.

use crate::types::{CircleCandidate, SearchSpec};

/// Keep candidates whose center lies strictly inside the square search window.
///
/// Each axis is tested on its own (`|c - a| < window / 2`), so a candidate in a
/// window corner is accepted even when its Euclidean distance exceeds half the
/// window. Input order is preserved.
pub fn filter_by_window(candidates: &[CircleCandidate], search: &SearchSpec) -> Vec<CircleCandidate> {
    let half = search.half_window();
    let [ax, ay] = search.approx_center;
    candidates
        .iter()
        .filter(|c| {
            (c.center_x as f64 - ax as f64).abs() < half
                && (c.center_y as f64 - ay as f64).abs() < half
        })
        .copied()
        .collect()
}

/// Candidate closest to `approx_center`; the earliest one wins ties.
pub fn select_nearest(candidates: &[CircleCandidate], approx_center: [i32; 2]) -> Option<CircleCandidate> {
    let [ax, ay] = approx_center;
    let mut best: Option<(f64, CircleCandidate)> = None;
    for c in candidates {
        let d = (c.center_x as f64 - ax as f64).hypot(c.center_y as f64 - ay as f64);
        if best.is_none_or(|(bd, _)| d < bd) {
            best = Some((d, *c));
        }
    }
    best.map(|(_, c)| c)
}
