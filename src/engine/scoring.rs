//! Score mapping for the built-in engines.
//!
//! The metric is the (error-weighted) mean squared residual. It maps onto a
//! 0-100 score on a log scale: `BASELINE_METRIC` scores 20, `GOOD_METRIC`
//! scores 80, and the line is extrapolated and clamped outside that band.

use crate::core::curve::CurveData;

pub const BASELINE_METRIC: f64 = 1.0e6;
pub const GOOD_METRIC: f64 = 1.0;
const BASELINE_SCORE: f64 = 20.0;
const GOOD_SCORE: f64 = 80.0;

/// Mean squared residual, divided by sigma^2 per point when the curve carries
/// uncertainties. Returns `None` if any prediction is non-finite.
pub fn weighted_mse(curve: &CurveData, predicted: &[f64]) -> Option<f64> {
    if predicted.len() != curve.len() || predicted.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let sum: f64 = match curve.error() {
        Some(sigma) => curve
            .y()
            .iter()
            .zip(predicted)
            .zip(sigma)
            .map(|((y, p), s)| ((y - p) / s).powi(2))
            .sum(),
        None => curve.y().iter().zip(predicted).map(|(y, p)| (y - p).powi(2)).sum(),
    };
    Some(sum / curve.len() as f64)
}

/// Logarithmic metric-to-score mapping. A perfect fit scores 100.
pub fn score_from_metric(metric: f64) -> f64 {
    if metric.is_nan() {
        return f64::NAN;
    }
    if metric <= 0.0 {
        return 100.0;
    }
    let span = BASELINE_METRIC.log10() - GOOD_METRIC.log10();
    let t = (BASELINE_METRIC.log10() - metric.log10()) / span;
    (BASELINE_SCORE + t * (GOOD_SCORE - BASELINE_SCORE)).clamp(0.0, 100.0)
}

/// Scores predictions against the curve. Non-finite predictions score NaN,
/// which the session never treats as an improvement.
pub fn score(curve: &CurveData, predicted: &[f64]) -> f64 {
    weighted_mse(curve, predicted).map(score_from_metric).unwrap_or(f64::NAN)
}
