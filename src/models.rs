use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deviation::DetectionMethod;

#[derive(Debug, Clone)]
pub struct Signal {
    pub id: Uuid,
    pub name: String,
    pub sector_id: String,
    pub unit: String,
    pub frequency: String,
}

#[derive(Debug, Clone)]
pub struct NumericObservation {
    pub signal_id: Uuid,
    pub region_id: String,
    pub observed_at: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextSource {
    CitizenReport,
    FieldRecord,
}

impl TextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextSource::CitizenReport => "CITIZEN_REPORT",
            TextSource::FieldRecord => "FIELD_RECORD",
        }
    }
}

impl FromStr for TextSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CITIZEN_REPORT" => Ok(TextSource::CitizenReport),
            "FIELD_RECORD" => Ok(TextSource::FieldRecord),
            other => Err(format!("unknown text source {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextObservation {
    pub id: Uuid,
    pub region_id: String,
    pub observed_at: DateTime<Utc>,
    pub body: String,
    pub source: TextSource,
}

/// A numeric series is identified by its signal and region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub signal_id: Uuid,
    pub region_id: String,
}

#[derive(Debug, Clone)]
pub struct Baseline {
    pub signal_id: Uuid,
    pub region_id: String,
    pub mean: f64,
    pub std_dev: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub region_id: String,
    pub observed_at: DateTime<Utc>,
    pub severity: f64,
    pub method: DetectionMethod,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewAnomaly {
    pub signal_id: Uuid,
    pub region_id: String,
    pub observed_at: DateTime<Utc>,
    pub severity: f64,
    pub method: DetectionMethod,
    pub description: String,
}

/// An anomaly read back together with the name of the signal it fired on.
#[derive(Debug, Clone)]
pub struct ScopedAnomaly {
    pub event: AnomalyEvent,
    pub signal_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityLabel {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLabel::Low => "LOW",
            SeverityLabel::Medium => "MEDIUM",
            SeverityLabel::High => "HIGH",
            SeverityLabel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for SeverityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub numeric_anomalies: Vec<String>,
    pub text_insights: Vec<String>,
    pub sentiment_score: f64,
    pub total_reports: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub region_id: String,
    pub sector_id: String,
    pub score: f64,
    pub severity: SeverityLabel,
    pub confidence: Confidence,
    pub evidence: Evidence,
    pub anomaly_count: usize,
    pub max_severity: f64,
    pub primary_anomaly: Option<Uuid>,
    pub assessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "NEW",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NEW" => Ok(AlertStatus::New),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub anomaly_id: Uuid,
    pub status: AlertStatus,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub recommendations: Vec<Recommendation>,
}

/// An alert joined with the scope of its primary anomaly.
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub alert: Alert,
    pub region_id: String,
    pub sector_id: String,
    pub snapshot: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ReviewEntry {
    pub alert_id: Uuid,
    pub reviewer: String,
    pub action: String,
    pub comments: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}
