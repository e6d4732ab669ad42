use std::env;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::text::Lexicon;

/// Topic clustering never asks for more clusters than this.
pub const MAX_CLUSTERS: usize = 5;

/// Longest trailing window, in days, accepted for fusion and text lookbacks.
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Start of the trailing window of `days` days ending at `end`.
pub fn window_start(end: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(EngineError::Config(format!(
            "window must be between 1 and {MAX_WINDOW_DAYS} days, got {days}"
        )));
    }
    TimeDelta::try_days(days)
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or_else(|| EngineError::Config(format!("{days}-day window before {end} is out of range")))
}

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable config value, using default");
            default
        }),
        None => default,
    }
}

// ── Detector parameters ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub zscore_threshold: f64,
    pub cusum_drift: f64,
    pub cusum_threshold: f64,
    pub ewma_lambda: f64,
    pub ewma_sigma: f64,
    pub drop_percent: f64,
    pub shift_window: usize,
    pub shift_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: 3.0,
            cusum_drift: 1.0,
            cusum_threshold: 5.0,
            ewma_lambda: 0.2,
            ewma_sigma: 3.0,
            drop_percent: 0.3,
            shift_window: 5,
            shift_ratio: 1.5,
        }
    }
}

// ── Batch sizing ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Most recent observations fed to the baseline estimator.
    pub baseline_window: usize,
    /// Most recent observations fed to the windowed detectors.
    pub detection_window: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            baseline_window: 1000,
            detection_window: 50,
        }
    }
}

// ── Fusion and alerting ───────────────────────────────────────

/// A targeted action added when `keyword` shows up in numeric evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub keyword: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub window_days: i64,
    pub alert_threshold: f64,
    pub strong_negative_sentiment: f64,
    pub domain_rules: Vec<DomainRule>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            alert_threshold: 70.0,
            strong_negative_sentiment: -0.5,
            domain_rules: vec![DomainRule {
                keyword: "water".to_string(),
                action: "Check valve pressure and contamination levels.".to_string(),
            }],
        }
    }
}

// ── Text processing ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    pub cluster_count: usize,
    pub cluster_max_iterations: usize,
    pub cluster_budget_ms: u64,
    pub surge_min_word_len: usize,
    pub surge_growth_percent: f64,
    pub surge_top_n: usize,
    pub surge_candidates: usize,
    pub lexicon: Lexicon,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            cluster_count: MAX_CLUSTERS,
            cluster_max_iterations: 100,
            cluster_budget_ms: 2_000,
            surge_min_word_len: 4,
            surge_growth_percent: 20.0,
            surge_top_n: 10,
            surge_candidates: 100,
            lexicon: Lexicon::default(),
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub detectors: DetectorConfig,
    pub batch: BatchConfig,
    pub fusion: FusionConfig,
    pub text: TextConfig,
}

impl EngineConfig {
    /// Build the config from defaults overridden by `CIVIC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let d = &defaults.detectors;
        let detectors = DetectorConfig {
            zscore_threshold: env_parse("CIVIC_ZSCORE_THRESHOLD", d.zscore_threshold),
            cusum_drift: env_parse("CIVIC_CUSUM_DRIFT", d.cusum_drift),
            cusum_threshold: env_parse("CIVIC_CUSUM_THRESHOLD", d.cusum_threshold),
            ewma_lambda: env_parse("CIVIC_EWMA_LAMBDA", d.ewma_lambda),
            ewma_sigma: env_parse("CIVIC_EWMA_SIGMA", d.ewma_sigma),
            drop_percent: env_parse("CIVIC_DROP_PERCENT", d.drop_percent),
            shift_window: env_parse("CIVIC_SHIFT_WINDOW", d.shift_window),
            shift_ratio: env_parse("CIVIC_SHIFT_RATIO", d.shift_ratio),
        };

        if !(detectors.ewma_lambda > 0.0 && detectors.ewma_lambda <= 1.0) {
            return Err(EngineError::Config(format!(
                "CIVIC_EWMA_LAMBDA must be in (0, 1], got {}",
                detectors.ewma_lambda
            )));
        }

        let batch = BatchConfig {
            baseline_window: env_parse("CIVIC_BASELINE_WINDOW", defaults.batch.baseline_window),
            detection_window: env_parse("CIVIC_DETECTION_WINDOW", defaults.batch.detection_window),
        };

        let fusion = FusionConfig {
            window_days: env_parse("CIVIC_FUSION_WINDOW_DAYS", defaults.fusion.window_days),
            alert_threshold: env_parse("CIVIC_ALERT_THRESHOLD", defaults.fusion.alert_threshold),
            ..defaults.fusion.clone()
        };
        window_start(Utc::now(), fusion.window_days)?;

        let t = &defaults.text;
        let mut cluster_count = env_parse("CIVIC_CLUSTER_COUNT", t.cluster_count);
        if cluster_count > MAX_CLUSTERS {
            warn!(cluster_count, max = MAX_CLUSTERS, "cluster count capped");
            cluster_count = MAX_CLUSTERS;
        }

        let lexicon = match env_opt("CIVIC_LEXICON_PATH") {
            Some(path) => Lexicon::from_path(&path)?,
            None => t.lexicon.clone(),
        };

        let text = TextConfig {
            cluster_count,
            cluster_max_iterations: env_parse("CIVIC_CLUSTER_MAX_ITERATIONS", t.cluster_max_iterations),
            cluster_budget_ms: env_parse("CIVIC_CLUSTER_BUDGET_MS", t.cluster_budget_ms),
            surge_min_word_len: env_parse("CIVIC_SURGE_MIN_WORD_LEN", t.surge_min_word_len),
            surge_growth_percent: env_parse("CIVIC_SURGE_GROWTH_PERCENT", t.surge_growth_percent),
            surge_top_n: env_parse("CIVIC_SURGE_TOP_N", t.surge_top_n),
            surge_candidates: t.surge_candidates,
            lexicon,
        };

        Ok(Self {
            detectors,
            batch,
            fusion,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.detectors.zscore_threshold, 3.0);
        assert_eq!(config.detectors.cusum_drift, 1.0);
        assert_eq!(config.detectors.cusum_threshold, 5.0);
        assert_eq!(config.detectors.ewma_lambda, 0.2);
        assert_eq!(config.detectors.drop_percent, 0.3);
        assert_eq!(config.detectors.shift_window, 5);
        assert_eq!(config.fusion.window_days, 7);
        assert_eq!(config.fusion.alert_threshold, 70.0);
        assert_eq!(config.text.cluster_count, MAX_CLUSTERS);
        assert_eq!(config.text.surge_min_word_len, 4);
        assert_eq!(config.text.surge_top_n, 10);
    }

    #[test]
    fn windows_outside_the_calendar_are_rejected() {
        let now = Utc::now();
        assert_eq!(window_start(now, 7).unwrap(), now - TimeDelta::days(7));
        for days in [0, -3, MAX_WINDOW_DAYS + 1, 1_000_000_000, 10_000_000_000, i64::MAX] {
            assert!(matches!(window_start(now, days), Err(EngineError::Config(_))), "{days}");
        }
        assert!(matches!(
            window_start(DateTime::<Utc>::MIN_UTC, 1),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn config_survives_json_round_trip() {
        let config = EngineConfig::default();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: EngineConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, config);
    }
}
