//! Deviation detectors over a numeric window.
//!
//! Every detector is a pure function that returns `Some(severity)` only when
//! its breach condition holds. "No anomaly" is `None`, never zero, and any
//! division by zero short-circuits to `None`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::baseline::BaselineStats;
use crate::config::{BatchConfig, DetectorConfig};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[serde(rename = "zscore")]
    ZScore,
    Cusum,
    Ewma,
    SuddenDrop,
    MeanShift,
}

impl DetectionMethod {
    pub const ALL: [DetectionMethod; 5] = [
        DetectionMethod::ZScore,
        DetectionMethod::Cusum,
        DetectionMethod::Ewma,
        DetectionMethod::SuddenDrop,
        DetectionMethod::MeanShift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::ZScore => "zscore",
            DetectionMethod::Cusum => "cusum",
            DetectionMethod::Ewma => "ewma",
            DetectionMethod::SuddenDrop => "sudden_drop",
            DetectionMethod::MeanShift => "mean_shift",
        }
    }

    /// What a severity from this method measures.
    pub fn unit(&self) -> &'static str {
        match self {
            DetectionMethod::ZScore | DetectionMethod::Cusum | DetectionMethod::Ewma => "sigma",
            DetectionMethod::SuddenDrop => "drop fraction",
            DetectionMethod::MeanShift => "shift ratio",
        }
    }

    /// Number of most recent observations this method reads.
    pub fn window_len(&self, batch: &BatchConfig, params: &DetectorConfig) -> usize {
        match self {
            DetectionMethod::ZScore => 1,
            DetectionMethod::MeanShift => batch.detection_window.max(params.shift_window * 2),
            _ => batch.detection_window.max(2),
        }
    }

    /// Runs the method over a chronologically ordered window.
    ///
    /// A baseline without spread cannot anchor any method, so a zero or
    /// non-finite standard deviation yields `None` for all of them.
    pub fn evaluate(
        &self,
        window: &[f64],
        baseline: &BaselineStats,
        params: &DetectorConfig,
    ) -> Option<f64> {
        if !(baseline.std_dev.is_finite() && baseline.std_dev > 0.0) || !baseline.mean.is_finite() {
            return None;
        }

        let severity = match self {
            DetectionMethod::ZScore => {
                let latest = *window.last()?;
                zscore(latest, baseline.mean, baseline.std_dev, params.zscore_threshold)
            }
            DetectionMethod::Cusum => cusum(
                window,
                baseline.mean,
                baseline.std_dev,
                params.cusum_drift,
                params.cusum_threshold,
            ),
            DetectionMethod::Ewma => ewma(
                window,
                baseline.mean,
                baseline.std_dev,
                params.ewma_lambda,
                params.ewma_sigma,
            ),
            DetectionMethod::SuddenDrop => sudden_drop(window, params.drop_percent),
            DetectionMethod::MeanShift => mean_shift(window, params.shift_window, params.shift_ratio),
        }?;

        severity.is_finite().then_some(severity)
    }

    /// Human-readable description stored alongside a detected anomaly.
    pub fn describe(&self, window: &[f64], baseline: &BaselineStats, severity: f64) -> String {
        match self {
            DetectionMethod::ZScore => format!(
                "Z-score anomaly. Value: {:.2}, Mean: {:.2}",
                window.last().copied().unwrap_or(f64::NAN),
                baseline.mean
            ),
            DetectionMethod::Cusum => format!("CUSUM drift detected ({severity:.2} sigma)."),
            DetectionMethod::Ewma => format!("EWMA shift detected ({severity:.2} sigma)."),
            DetectionMethod::SuddenDrop => {
                format!("Sudden drop detected ({:.0}% below recent average).", severity * 100.0)
            }
            DetectionMethod::MeanShift => {
                format!("Structural mean shift detected (ratio {severity:.2}).")
            }
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "zscore" | "z_score" => Ok(DetectionMethod::ZScore),
            "cusum" => Ok(DetectionMethod::Cusum),
            "ewma" => Ok(DetectionMethod::Ewma),
            "sudden_drop" => Ok(DetectionMethod::SuddenDrop),
            "mean_shift" | "changepoint" => Ok(DetectionMethod::MeanShift),
            _ => Err(EngineError::UnknownMethod(value.to_string())),
        }
    }
}

/// Signed z-score of `value` when its magnitude exceeds `threshold`.
pub fn zscore(value: f64, mean: f64, std_dev: f64, threshold: f64) -> Option<f64> {
    if std_dev == 0.0 {
        return None;
    }
    let z = (value - mean) / std_dev;
    (z.abs() > threshold).then_some(z)
}

/// Tabular two-sided CUSUM, restarted from zero on every call.
///
/// Reports the largest normalized cumulative sum that crossed `h`.
pub fn cusum(values: &[f64], mean: f64, std_dev: f64, drift: f64, threshold: f64) -> Option<f64> {
    if values.is_empty() || std_dev == 0.0 {
        return None;
    }

    let k = drift * std_dev / 2.0;
    let h = threshold * std_dev;

    let mut c_plus = 0.0_f64;
    let mut c_minus = 0.0_f64;
    let mut worst: Option<f64> = None;

    for &x in values {
        c_plus = (c_plus + (x - mean) - k).max(0.0);
        c_minus = (c_minus - (x - mean) - k).max(0.0);

        for c in [c_plus, c_minus] {
            if c > h {
                let normalized = c / std_dev;
                worst = Some(worst.map_or(normalized, |w| w.max(normalized)));
            }
        }
    }

    worst
}

/// EWMA control chart seeded at the baseline mean.
///
/// Only the final smoothed value is tested against the control limit.
pub fn ewma(values: &[f64], mean: f64, std_dev: f64, lambda: f64, sigma: f64) -> Option<f64> {
    if values.is_empty() || std_dev == 0.0 {
        return None;
    }

    let z = values
        .iter()
        .fold(mean, |z, &x| lambda * x + (1.0 - lambda) * z);
    let control_limit = sigma * std_dev * (lambda / (2.0 - lambda)).sqrt();

    ((z - mean).abs() > control_limit).then(|| (z - mean) / std_dev)
}

/// Relative drop of the last value below the average of the preceding ones.
pub fn sudden_drop(values: &[f64], drop_percent: f64) -> Option<f64> {
    let (&current, previous) = values.split_last()?;
    if previous.is_empty() {
        return None;
    }

    let avg_prev = previous.iter().sum::<f64>() / previous.len() as f64;
    if avg_prev == 0.0 {
        return None;
    }

    let drop = (avg_prev - current) / avg_prev;
    (drop >= drop_percent).then_some(drop)
}

/// Compares the mean of the final `window_size` points against the window
/// immediately before it.
pub fn mean_shift(values: &[f64], window_size: usize, threshold_ratio: f64) -> Option<f64> {
    if window_size == 0 || values.len() < window_size * 2 {
        return None;
    }

    let n = values.len();
    let before = &values[n - 2 * window_size..n - window_size];
    let after = &values[n - window_size..];

    let mean1 = before.iter().sum::<f64>() / window_size as f64;
    let mean2 = after.iter().sum::<f64>() / window_size as f64;
    if mean1 == 0.0 {
        return None;
    }

    let ratio = (mean2 - mean1).abs() / mean1.abs();
    (ratio > threshold_ratio).then_some(ratio)
}
