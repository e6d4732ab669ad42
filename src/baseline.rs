use serde::{Deserialize, Serialize};

/// Mean and sample standard deviation of a series' recent history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Computes the baseline over `values` in any order.
///
/// Uses the sample standard deviation (n - 1). Returns `None` with fewer than
/// two values or when the arithmetic does not produce finite numbers.
pub fn compute(values: &[f64]) -> Option<BaselineStats> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if !mean.is_finite() || !std_dev.is_finite() {
        return None;
    }

    Some(BaselineStats { mean, std_dev })
}
