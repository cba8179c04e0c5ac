//! Per-universe timing statistics over packet timestamps.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[error("insufficient data: {count} sample(s), need at least 2")]
pub struct InsufficientSamples {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingStats {
    /// Number of timestamps (not deltas).
    pub count:    usize,
    /// Mean inter-arrival time.
    pub mean_ms:  f64,
    /// Sample standard deviation of the inter-arrival times. `None` with a
    /// single delta, where the n-1 denominator is zero.
    pub stdev_ms: Option<f64>,
    /// `1000 / mean_ms`; `None` when every timestamp is identical.
    pub fps:      Option<f64>,
}

/// Compute inter-arrival statistics for one universe.
pub fn compute(timestamps: &[u32]) -> Result<TimingStats, InsufficientSamples> {
    if timestamps.len() < 2 {
        return Err(InsufficientSamples { count: timestamps.len() });
    }

    let deltas: Vec<f64> = timestamps
        .windows(2)
        .map(|w| w[1] as f64 - w[0] as f64)
        .collect();
    let n = deltas.len() as f64;
    let mean = deltas.iter().sum::<f64>() / n;

    let stdev = if deltas.len() > 1 {
        let var = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    } else {
        None
    };

    Ok(TimingStats {
        count:    timestamps.len(),
        mean_ms:  mean,
        stdev_ms: stdev,
        fps:      (mean > 0.0).then(|| 1000.0 / mean),
    })
}
