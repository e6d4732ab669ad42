//! Fuses numeric anomalies and citizen text into a sector health score.

use chrono::{DateTime, Utc};

use crate::config::{window_start, EngineConfig, FusionConfig};
use crate::error::Result;
use crate::models::{
    AnomalyEvent, Confidence, Evidence, HealthAssessment, ScopedAnomaly, SeverityLabel,
    TextObservation,
};
use crate::store::Store;
use crate::text;

const MAX_PENALTY_PER_ANOMALY: f64 = 30.0;
const PENALTY_PER_SEVERITY: f64 = 5.0;
const SENTIMENT_WEIGHT: f64 = 20.0;
const HIGH_VOLUME_REPORTS: usize = 10;
const HIGH_VOLUME_PENALTY: f64 = 10.0;

pub fn severity_label(score: f64) -> SeverityLabel {
    if score < 40.0 {
        SeverityLabel::Critical
    } else if score < 70.0 {
        SeverityLabel::High
    } else if score < 90.0 {
        SeverityLabel::Medium
    } else {
        SeverityLabel::Low
    }
}

/// Confidence grows with the amount of evidence behind a score.
pub fn confidence(data_points: usize) -> Confidence {
    match data_points {
        0..=10 => Confidence::Low,
        11..=50 => Confidence::Medium,
        _ => Confidence::High,
    }
}

/// Picks the anomaly that anchors an alert: largest magnitude, then the
/// earliest timestamp, then the lowest id.
pub fn select_primary(anomalies: &[ScopedAnomaly]) -> Option<&AnomalyEvent> {
    anomalies
        .iter()
        .map(|a| &a.event)
        .min_by(|a, b| {
            b.severity
                .abs()
                .total_cmp(&a.severity.abs())
                .then(a.observed_at.cmp(&b.observed_at))
                .then(a.id.cmp(&b.id))
        })
}

/// Scores one (region, sector) scope from already-fetched evidence.
///
/// Penalties, `max_severity` and the primary anomaly all use the magnitude
/// `|severity|`. A z-score of -6 weighs the same as +6.
pub fn assess(
    region_id: &str,
    sector_id: &str,
    anomalies: &[ScopedAnomaly],
    documents: &[TextObservation],
    config: &EngineConfig,
    as_of: DateTime<Utc>,
) -> HealthAssessment {
    let mut score: f64 = 100.0;
    let mut evidence = Evidence {
        total_reports: documents.len(),
        ..Evidence::default()
    };

    let mut max_severity: f64 = 0.0;
    for anomaly in anomalies {
        let magnitude = anomaly.event.severity.abs();
        max_severity = max_severity.max(magnitude);
        score -= (magnitude * PENALTY_PER_SEVERITY).min(MAX_PENALTY_PER_ANOMALY);
        evidence.numeric_anomalies.push(format!(
            "Signal {} deviation: {:.2} {} ({})",
            anomaly.signal_name,
            anomaly.event.severity,
            anomaly.event.method.unit(),
            anomaly.event.method
        ));
    }

    if !documents.is_empty() {
        let lexicon = &config.text.lexicon;
        let total: f64 = documents.iter().map(|d| text::sentiment(&d.body, lexicon)).sum();
        let avg_sentiment = total / documents.len() as f64;
        evidence.sentiment_score = avg_sentiment;

        if avg_sentiment < 0.0 {
            score -= avg_sentiment.abs() * SENTIMENT_WEIGHT;
            evidence
                .text_insights
                .push(format!("Negative citizen sentiment ({avg_sentiment:.2})"));
        }

        if documents.len() > HIGH_VOLUME_REPORTS {
            score -= HIGH_VOLUME_PENALTY;
            evidence
                .text_insights
                .push(format!("High issue volume ({} reports)", documents.len()));
        }
    }

    let score = score.clamp(0.0, 100.0);

    HealthAssessment {
        region_id: region_id.to_string(),
        sector_id: sector_id.to_string(),
        score,
        severity: severity_label(score),
        confidence: confidence(anomalies.len() + documents.len()),
        evidence,
        anomaly_count: anomalies.len(),
        max_severity,
        primary_anomaly: select_primary(anomalies).map(|a| a.id),
        assessed_at: as_of,
    }
}

/// Fetches the trailing window for a scope and scores it.
pub async fn assess_scope(
    store: &dyn Store,
    region_id: &str,
    sector_id: &str,
    config: &EngineConfig,
    as_of: DateTime<Utc>,
) -> Result<HealthAssessment> {
    let from = window_start(as_of, config.fusion.window_days)?;
    let anomalies = store.sector_anomalies(region_id, sector_id, from, as_of).await?;
    let documents = store.documents(Some(region_id), from, as_of).await?;
    Ok(assess(region_id, sector_id, &anomalies, &documents, config, as_of))
}

/// Actions for a scored scope. Never empty.
pub fn recommendations(label: SeverityLabel, evidence: &Evidence, config: &FusionConfig) -> Vec<String> {
    let mut recs = Vec::new();

    match label {
        SeverityLabel::Critical => {
            recs.push("Immediate deployment of inspection team required.".to_string());
            recs.push("Notify Sector Head and District Collector.".to_string());
        }
        SeverityLabel::High => {
            recs.push("Schedule maintenance check within 24 hours.".to_string());
            recs.push("Review recent citizen complaints for specific locations.".to_string());
        }
        SeverityLabel::Medium | SeverityLabel::Low => {}
    }

    for rule in &config.domain_rules {
        let keyword = rule.keyword.to_lowercase();
        if evidence
            .numeric_anomalies
            .iter()
            .any(|line| line.to_lowercase().contains(&keyword))
        {
            recs.push(rule.action.clone());
        }
    }

    if evidence.sentiment_score < config.strong_negative_sentiment {
        recs.push("Initiate public awareness campaign to address grievances.".to_string());
    }

    if recs.is_empty() {
        recs.push("Monitor situation. No immediate action required.".to_string());
    }

    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deviation::DetectionMethod;
    use crate::error::EngineError;
    use crate::models::TextSource;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;
    use uuid::Uuid;

    fn anomaly(name: &str, severity: f64, hours_ago: i64) -> ScopedAnomaly {
        ScopedAnomaly {
            event: AnomalyEvent {
                id: Uuid::new_v4(),
                signal_id: Uuid::new_v4(),
                region_id: "r1".to_string(),
                observed_at: Utc::now() - Duration::hours(hours_ago),
                severity,
                method: DetectionMethod::ZScore,
                description: "test".to_string(),
            },
            signal_name: name.to_string(),
        }
    }

    fn document(body: &str) -> TextObservation {
        TextObservation {
            id: Uuid::new_v4(),
            region_id: "r1".to_string(),
            observed_at: Utc::now(),
            body: body.to_string(),
            source: TextSource::CitizenReport,
        }
    }

    #[test]
    fn empty_scope_is_fully_healthy() {
        let result = assess("r1", "water", &[], &[], &EngineConfig::default(), Utc::now());
        assert_eq!(result.score, 100.0);
        assert_eq!(result.severity, SeverityLabel::Low);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.primary_anomaly.is_none());
        assert!(result.evidence.numeric_anomalies.is_empty());
    }

    #[test]
    fn label_boundaries_are_exclusive_upper() {
        assert_eq!(severity_label(0.0), SeverityLabel::Critical);
        assert_eq!(severity_label(39.999), SeverityLabel::Critical);
        assert_eq!(severity_label(40.0), SeverityLabel::High);
        assert_eq!(severity_label(69.999), SeverityLabel::High);
        assert_eq!(severity_label(70.0), SeverityLabel::Medium);
        assert_eq!(severity_label(89.999), SeverityLabel::Medium);
        assert_eq!(severity_label(90.0), SeverityLabel::Low);
        assert_eq!(severity_label(100.0), SeverityLabel::Low);
    }

    #[test]
    fn confidence_tracks_evidence_volume() {
        assert_eq!(confidence(0), Confidence::Low);
        assert_eq!(confidence(10), Confidence::Low);
        assert_eq!(confidence(11), Confidence::Medium);
        assert_eq!(confidence(50), Confidence::Medium);
        assert_eq!(confidence(51), Confidence::High);
    }

    #[test]
    fn anomaly_penalties_are_capped() {
        let anomalies = vec![anomaly("Groundwater", 3.5, 1), anomaly("Rainfall", 12.0, 2)];
        let result = assess("r1", "water", &anomalies, &[], &EngineConfig::default(), Utc::now());
        // 3.5 * 5 = 17.5, 12 * 5 capped at 30
        assert!((result.score - 52.5).abs() < 1e-9);
        assert_eq!(result.severity, SeverityLabel::High);
        assert_eq!(result.max_severity, 12.0);
        assert_eq!(result.evidence.numeric_anomalies.len(), 2);
        assert!(result.evidence.numeric_anomalies[0].contains("Groundwater"));
    }

    #[test]
    fn evidence_lines_carry_the_method_unit() {
        let mut drop = anomaly("Reservoir", 0.45, 1);
        drop.event.method = DetectionMethod::SuddenDrop;
        let mut shift = anomaly("Tank", 2.0, 2);
        shift.event.method = DetectionMethod::MeanShift;
        let spike = anomaly("Pressure", 4.0, 3);

        let result = assess("r1", "water", &[drop, shift, spike], &[], &EngineConfig::default(), Utc::now());
        assert_eq!(
            result.evidence.numeric_anomalies,
            vec![
                "Signal Reservoir deviation: 0.45 drop fraction (sudden_drop)",
                "Signal Tank deviation: 2.00 shift ratio (mean_shift)",
                "Signal Pressure deviation: 4.00 sigma (zscore)",
            ]
        );
    }

    #[test]
    fn negative_deviations_also_penalize() {
        let anomalies = vec![anomaly("Reservoir", -4.0, 1)];
        let result = assess("r1", "water", &anomalies, &[], &EngineConfig::default(), Utc::now());
        assert!((result.score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let anomalies: Vec<ScopedAnomaly> = (0..6).map(|i| anomaly("Tank", 10.0, i)).collect();
        let documents: Vec<TextObservation> = (0..12).map(|_| document("worst service")).collect();
        let result = assess("r1", "water", &anomalies, &documents, &EngineConfig::default(), Utc::now());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.severity, SeverityLabel::Critical);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.evidence.text_insights.len(), 2);
    }

    #[test]
    fn keyword_free_text_is_not_negative() {
        let documents = vec![document("Pipe near the school"), document("Tanker arrived")];
        let result = assess("r1", "water", &[], &documents, &EngineConfig::default(), Utc::now());
        assert_eq!(result.evidence.sentiment_score, 0.0);
        assert_eq!(result.score, 100.0);
        assert!(result.evidence.text_insights.is_empty());
        assert_eq!(result.evidence.total_reports, 2);
    }

    #[test]
    fn negative_sentiment_costs_up_to_twenty_points() {
        let documents = vec![document("angry about the worst supply"), document("thanks")];
        let result = assess("r1", "water", &[], &documents, &EngineConfig::default(), Utc::now());
        // (-1 + 1) / 2 = 0, no penalty
        assert_eq!(result.score, 100.0);

        let documents = vec![document("angry"), document("bad")];
        let result = assess("r1", "water", &[], &documents, &EngineConfig::default(), Utc::now());
        assert!((result.score - 80.0).abs() < 1e-9);
        assert_eq!(result.evidence.text_insights, vec!["Negative citizen sentiment (-1.00)"]);
    }

    #[test]
    fn primary_prefers_magnitude_then_earliest() {
        let strongest = anomaly("A", -6.0, 1);
        let older_tie = anomaly("B", 6.0, 5);
        let weaker = anomaly("C", 4.0, 10);
        let anomalies = vec![strongest.clone(), weaker, older_tie.clone()];
        assert_eq!(select_primary(&anomalies).unwrap().id, older_tie.event.id);

        let reordered = vec![older_tie.clone(), strongest];
        assert_eq!(select_primary(&reordered).unwrap().id, older_tie.event.id);
        assert!(select_primary(&[]).is_none());
    }

    #[test]
    fn recommendations_escalate_by_severity() {
        let config = FusionConfig::default();
        let evidence = Evidence::default();

        let critical = recommendations(SeverityLabel::Critical, &evidence, &config);
        assert_eq!(critical.len(), 2);
        assert!(critical[0].contains("inspection team"));

        let high = recommendations(SeverityLabel::High, &evidence, &config);
        assert!(high[0].contains("maintenance check"));
    }

    #[test]
    fn recommendations_add_domain_and_sentiment_actions() {
        let config = FusionConfig::default();
        let evidence = Evidence {
            numeric_anomalies: vec!["Signal Water Pressure deviation: 4.00 sigma (zscore)".to_string()],
            text_insights: vec![],
            sentiment_score: -0.75,
            total_reports: 4,
        };
        let recs = recommendations(SeverityLabel::Medium, &evidence, &config);
        assert_eq!(
            recs,
            vec![
                "Check valve pressure and contamination levels.".to_string(),
                "Initiate public awareness campaign to address grievances.".to_string(),
            ]
        );
    }

    #[test]
    fn recommendations_fall_back_to_monitoring() {
        let recs = recommendations(SeverityLabel::Low, &Evidence::default(), &FusionConfig::default());
        assert_eq!(recs, vec!["Monitor situation. No immediate action required.".to_string()]);
    }

    #[tokio::test]
    async fn scope_only_reads_sector_and_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let water = store.add_signal("Water Pressure", "water").await;
        let power = store.add_signal("Grid Load", "power").await;

        for (signal, region, days_ago, value) in [
            (water, "r1", 1, 5.0),
            (water, "r1", 30, 5.0),
            (power, "r1", 1, 5.0),
            (water, "r2", 1, 5.0),
        ] {
            store
                .insert_anomaly(crate::models::NewAnomaly {
                    signal_id: signal,
                    region_id: region.to_string(),
                    observed_at: now - Duration::days(days_ago),
                    severity: value,
                    method: DetectionMethod::ZScore,
                    description: "seeded".to_string(),
                })
                .await
                .unwrap();
        }
        store.add_document("r1", now - Duration::days(2), "angry").await;
        store.add_document("r1", now - Duration::days(20), "angry").await;

        let result = assess_scope(&store, "r1", "water", &EngineConfig::default(), now)
            .await
            .unwrap();
        assert_eq!(result.anomaly_count, 1);
        assert_eq!(result.evidence.total_reports, 1);
        // 100 - 25 - 20
        assert!((result.score - 55.0).abs() < 1e-9);
        assert!(result.primary_anomaly.is_some());
    }

    #[tokio::test]
    async fn oversized_window_is_a_config_error() {
        let store = MemoryStore::new();
        for window_days in [10_000_000_000, 0] {
            let config = EngineConfig {
                fusion: FusionConfig {
                    window_days,
                    ..FusionConfig::default()
                },
                ..EngineConfig::default()
            };
            let result = assess_scope(&store, "r1", "water", &config, Utc::now()).await;
            assert!(matches!(result, Err(EngineError::Config(_))), "{window_days}");
        }
    }
}
