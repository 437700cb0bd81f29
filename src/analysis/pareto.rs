use std::cmp::Ordering;

use crate::engine::adapter::ParetoPoint;

/// Reduces a set of points to its non-dominated frontier.
///
/// A point is dropped if another point has lower complexity and a score at
/// least as high, or equal complexity and a higher score (first one wins on
/// an exact tie). Non-finite scores never make the frontier.
/// The result is sorted by ascending complexity with strictly rising scores.
pub fn frontier(points: &[ParetoPoint]) -> Vec<ParetoPoint> {
    let mut sorted: Vec<&ParetoPoint> = points.iter().filter(|p| p.score.is_finite()).collect();

    // Stable sort keeps search order among exact ties.
    sorted.sort_by(|a, b| {
        a.complexity
            .cmp(&b.complexity)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });

    let mut out: Vec<ParetoPoint> = Vec::new();
    let mut best = f64::NEG_INFINITY;
    for p in sorted {
        if p.score > best {
            best = p.score;
            out.push(p.clone());
        }
    }
    out
}

/// True if `a` dominates `b`.
pub fn dominates(a: &ParetoPoint, b: &ParetoPoint) -> bool {
    (a.complexity < b.complexity && a.score >= b.score) || (a.complexity == b.complexity && a.score > b.score)
}

/// Frontier-preserving insert into an archive that is already a frontier.
/// Returns true if the point joined the frontier.
pub fn insert(archive: &mut Vec<ParetoPoint>, point: ParetoPoint) -> bool {
    if !point.score.is_finite() {
        return false;
    }
    if archive
        .iter()
        .any(|p| dominates(p, &point) || (p.complexity == point.complexity && p.score == point.score))
    {
        return false;
    }
    archive.retain(|p| !dominates(&point, p));
    let idx = archive.partition_point(|p| p.complexity < point.complexity);
    archive.insert(idx, point);
    true
}
