use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::alerts::AlertView;
use crate::models::{AlertStatus, HealthAssessment};
use crate::text::CorpusInsights;

const MAX_ALERTS: usize = 10;

/// Renders a markdown health report for one region.
pub fn build_report(
    region_id: &str,
    as_of: DateTime<Utc>,
    window_days: i64,
    assessments: &[HealthAssessment],
    insights: Option<&CorpusInsights>,
    alerts: &[AlertView],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Civic Health Report: {region_id}");
    let _ = writeln!(
        output,
        "Generated {} (trailing {} days)",
        as_of.format("%Y-%m-%d %H:%M UTC"),
        window_days
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Sector Health");

    if assessments.is_empty() {
        let _ = writeln!(output, "No sectors assessed for this region.");
    } else {
        let mut ranked: Vec<&HealthAssessment> = assessments.iter().collect();
        ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
        for a in ranked {
            let _ = writeln!(
                output,
                "- {}: score {:.1} ({}, confidence {}) with {} anomalies, {} reports",
                a.sector_id,
                a.score,
                a.severity,
                a.confidence,
                a.anomaly_count,
                a.evidence.total_reports
            );
            for line in a.evidence.numeric_anomalies.iter().chain(&a.evidence.text_insights) {
                let _ = writeln!(output, "  - {line}");
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Citizen Feedback");

    match insights {
        None => {
            let _ = writeln!(output, "No citizen reports in this window.");
        }
        Some(insights) => {
            let _ = writeln!(
                output,
                "{} reports, average sentiment {:.2}",
                insights.total_documents, insights.average_sentiment
            );
            let _ = writeln!(output);
            let _ = writeln!(output, "### Failure Categories");
            let mut categories: Vec<(&String, &usize)> = insights.failure_distribution.iter().collect();
            categories.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (name, count) in categories {
                let _ = writeln!(output, "- {name}: {count}");
            }

            let _ = writeln!(output);
            let _ = writeln!(output, "### Topics");
            for cluster in &insights.topic_clusters {
                let _ = writeln!(
                    output,
                    "- Topic {} ({} reports): {}",
                    cluster.cluster_id,
                    cluster.count,
                    cluster.top_terms.join(", ")
                );
            }

            let _ = writeln!(output);
            let _ = writeln!(output, "### Emerging Keywords");
            if insights.keyword_surges.is_empty() {
                let _ = writeln!(output, "No keyword surges against the previous period.");
            } else {
                for surge in &insights.keyword_surges {
                    let _ = writeln!(
                        output,
                        "- {}: {} -> {} (+{:.1}%)",
                        surge.keyword, surge.previous_count, surge.current_count, surge.growth_percent
                    );
                }
            }
        }
    }

    let open: Vec<&AlertView> = alerts
        .iter()
        .filter(|a| a.status != AlertStatus::Resolved)
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Alerts");

    if open.is_empty() {
        let _ = writeln!(output, "No open alerts.");
    } else {
        for alert in open.iter().take(MAX_ALERTS) {
            let _ = writeln!(
                output,
                "- {} [{}] {} sector, {} (score {:.1}), assignee {}",
                alert.id,
                alert.status,
                alert.sector_id,
                alert.assessment.severity,
                alert.assessment.score,
                alert.assignee.as_deref().unwrap_or("unassigned")
            );
            for rec in &alert.recommendations {
                let _ = writeln!(output, "  - {rec}");
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, Evidence, SeverityLabel};
    use crate::text::{KeywordSurge, TopicCluster};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn assessment(sector: &str, score: f64, severity: SeverityLabel) -> HealthAssessment {
        HealthAssessment {
            region_id: "r1".to_string(),
            sector_id: sector.to_string(),
            score,
            severity,
            confidence: Confidence::Low,
            evidence: Evidence {
                numeric_anomalies: vec![format!("Signal {sector} probe deviation: 4.00 sigma (zscore)")],
                ..Evidence::default()
            },
            anomaly_count: 1,
            max_severity: 4.0,
            primary_anomaly: None,
            assessed_at: Utc::now(),
        }
    }

    fn view(status: AlertStatus) -> AlertView {
        AlertView {
            id: Uuid::new_v4(),
            status,
            assignee: None,
            created_at: Utc::now(),
            region_id: "r1".to_string(),
            sector_id: "water".to_string(),
            assessment: assessment("water", 45.0, SeverityLabel::High),
            recommendations: vec!["Schedule maintenance check within 24 hours.".to_string()],
            snapshot: None,
        }
    }

    #[test]
    fn empty_report_has_placeholders() {
        let report = build_report("r1", Utc::now(), 7, &[], None, &[]);
        assert!(report.starts_with("# Civic Health Report: r1"));
        assert!(report.contains("No sectors assessed for this region."));
        assert!(report.contains("No citizen reports in this window."));
        assert!(report.contains("No open alerts."));
    }

    #[test]
    fn sectors_are_listed_worst_first() {
        let assessments = vec![
            assessment("power", 95.0, SeverityLabel::Low),
            assessment("water", 45.0, SeverityLabel::High),
        ];
        let report = build_report("r1", Utc::now(), 7, &assessments, None, &[]);
        let water = report.find("- water: score 45.0 (HIGH").unwrap();
        let power = report.find("- power: score 95.0 (LOW").unwrap();
        assert!(water < power);
    }

    #[test]
    fn feedback_and_open_alerts_are_rendered() {
        let insights = CorpusInsights {
            total_documents: 4,
            average_sentiment: -0.5,
            failure_distribution: BTreeMap::from([("delay".to_string(), 1), ("quality".to_string(), 3)]),
            topic_clusters: vec![TopicCluster {
                cluster_id: 0,
                top_terms: vec!["water".to_string(), "supply".to_string()],
                count: 4,
            }],
            keyword_surges: vec![KeywordSurge {
                keyword: "drain".to_string(),
                current_count: 4,
                previous_count: 1,
                growth_percent: 300.0,
            }],
        };
        let alerts = vec![view(AlertStatus::New), view(AlertStatus::Resolved)];
        let report = build_report("r1", Utc::now(), 7, &[], Some(&insights), &alerts);

        assert!(report.contains("4 reports, average sentiment -0.50"));
        assert!(report.find("- quality: 3").unwrap() < report.find("- delay: 1").unwrap());
        assert!(report.contains("- Topic 0 (4 reports): water, supply"));
        assert!(report.contains("- drain: 1 -> 4 (+300.0%)"));
        assert_eq!(report.matches("[NEW]").count(), 1);
        assert!(!report.contains("[RESOLVED]"));
        assert!(report.contains("assignee unassigned"));
    }
}
