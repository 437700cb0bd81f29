use std::f64::consts::PI;
use std::str::FromStr;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::core::curve::{CurveData, CurveError};

/// Built-in demo shapes, standing in for a hand-drawn curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleShape {
    Linear,
    Quadratic,
    Sine,
    Damped,
    Gaussian,
}

impl SampleShape {
    pub const ALL: [SampleShape; 5] = [
        SampleShape::Linear,
        SampleShape::Quadratic,
        SampleShape::Sine,
        SampleShape::Damped,
        SampleShape::Gaussian,
    ];

    fn value(self, x: f64) -> f64 {
        match self {
            SampleShape::Linear => 2.0 * x + 1.0,
            SampleShape::Quadratic => 0.5 * x * x - x + 2.0,
            SampleShape::Sine => 3.0 * (x * PI / 4.0).sin(),
            SampleShape::Damped => (-0.3 * x).exp() * (2.0 * x).cos(),
            SampleShape::Gaussian => (-(x - 5.0).powi(2) / 4.0).exp(),
        }
    }
}

impl FromStr for SampleShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(SampleShape::Linear),
            "quadratic" => Ok(SampleShape::Quadratic),
            "sine" | "sin" => Ok(SampleShape::Sine),
            "damped" => Ok(SampleShape::Damped),
            "gaussian" => Ok(SampleShape::Gaussian),
            other => Err(format!("unknown sample shape '{}'", other)),
        }
    }
}

/// Sampling parameters for a demo curve on `[0, 10]`.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub shape: SampleShape,
    pub points: usize,
    /// Amplitude of uniform noise added to y (0 disables).
    pub noise: f64,
    pub seed: u64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            shape: SampleShape::Sine,
            points: 100,
            noise: 0.0,
            seed: 42,
        }
    }
}

/// Generates a reproducible curve. The same spec always yields the same data.
pub fn generate(spec: &SampleSpec) -> Result<CurveData, CurveError> {
    // The sampled range is [-noise, noise); its width must stay finite too.
    if !(spec.noise >= 0.0 && (2.0 * spec.noise).is_finite()) {
        return Err(CurveError::BadNoise(spec.noise));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
    let n = spec.points;
    let step = if n > 1 { 10.0 / (n - 1) as f64 } else { 0.0 };

    let points: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let x = i as f64 * step;
            let jitter = if spec.noise > 0.0 {
                rng.gen_range(-spec.noise..spec.noise)
            } else {
                0.0
            };
            (x, spec.shape.value(x) + jitter)
        })
        .collect();

    CurveData::from_points(&points)
}
