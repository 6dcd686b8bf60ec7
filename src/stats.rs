//! # Threshold Engine
//! Pure, testable statistics over a sample of view counts and the virality
//! cutoff derived from them. No I/O, suitable for unit tests and the admin
//! recalculation endpoint alike.

use serde::{Deserialize, Serialize};

use crate::model::ThresholdMethod;

pub const MULTIPLIER_MIN: f64 = 0.5;
pub const MULTIPLIER_MAX: f64 = 3.0;
pub const MULTIPLIER_DEFAULT: f64 = 1.5;

pub const SAMPLE_SIZE_MIN: u32 = 50;
pub const SAMPLE_SIZE_MAX: u32 = 1000;
pub const SAMPLE_SIZE_DEFAULT: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Distribution summary of one view-count sample plus the cutoff computed
/// from it. Empty samples degrade to all zeros rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdStats {
    pub sample_size: usize,
    pub mean: f64,
    /// Population standard deviation (divisor n, not n-1).
    pub std_dev: f64,
    pub min: u64,
    pub max: u64,
    pub percentiles: Percentiles,
    pub threshold: u64,
}

/// Clamp an optional multiplier into range; absent means the default, which
/// is not the same thing as zero.
pub fn effective_multiplier(multiplier: Option<f64>) -> f64 {
    multiplier
        .unwrap_or(MULTIPLIER_DEFAULT)
        .clamp(MULTIPLIER_MIN, MULTIPLIER_MAX)
}

pub fn clamp_sample_size(n: u32) -> u32 {
    n.clamp(SAMPLE_SIZE_MIN, SAMPLE_SIZE_MAX)
}

/// Compute distribution stats and the virality cutoff for a sample.
pub fn compute(views: &[u64], method: ThresholdMethod, multiplier: Option<f64>) -> ThresholdStats {
    if views.is_empty() {
        return ThresholdStats::default();
    }

    let n = views.len() as f64;
    let mean = views.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = views
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    let mut sorted = views.to_vec();
    sorted.sort_unstable();

    let percentiles = Percentiles {
        p25: percentile_sorted(&sorted, 25.0),
        p50: percentile_sorted(&sorted, 50.0),
        p75: percentile_sorted(&sorted, 75.0),
        p90: percentile_sorted(&sorted, 90.0),
        p95: percentile_sorted(&sorted, 95.0),
        p99: percentile_sorted(&sorted, 99.0),
    };

    let raw = match method {
        ThresholdMethod::Average => mean,
        ThresholdMethod::Statistical => mean + effective_multiplier(multiplier) * std_dev,
    };

    ThresholdStats {
        sample_size: views.len(),
        mean,
        std_dev,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        percentiles,
        threshold: raw.round().max(0.0) as u64,
    }
}

/// Linear interpolation at index `p/100 * (n-1)` over an already-sorted slice.
pub fn percentile_sorted(sorted: &[u64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0] as f64,
        n => {
            let idx = p / 100.0 * (n - 1) as f64;
            let lo = idx.floor() as usize;
            let hi = idx.ceil() as usize;
            if lo == hi {
                sorted[lo] as f64
            } else {
                let frac = idx - lo as f64;
                sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac
            }
        }
    }
}
