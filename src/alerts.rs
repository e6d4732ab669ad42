//! Alert lifecycle: generation from fused health scores, review transitions
//! and live display.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::explain::{self, Explainer};
use crate::fusion;
use crate::models::{Alert, AlertRecord, AlertStatus, HealthAssessment, ReviewEntry};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Acknowledge,
    Resolve,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Acknowledge => "ACKNOWLEDGE",
            ReviewAction::Resolve => "RESOLVE",
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewAction {
    type Err = EngineError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACKNOWLEDGE" => Ok(ReviewAction::Acknowledge),
            "RESOLVE" => Ok(ReviewAction::Resolve),
            _ => Err(EngineError::UnknownAction(value.to_string())),
        }
    }
}

/// Next status for a review action. RESOLVED is terminal: resolving again is
/// a no-op, acknowledging it is rejected.
pub fn transition(from: AlertStatus, action: ReviewAction) -> Result<AlertStatus> {
    match (from, action) {
        (AlertStatus::Resolved, ReviewAction::Resolve) => Ok(AlertStatus::Resolved),
        (AlertStatus::Resolved, ReviewAction::Acknowledge) => Err(EngineError::InvalidTransition {
            from,
            action: action.as_str().to_string(),
        }),
        (_, ReviewAction::Acknowledge) => Ok(AlertStatus::Acknowledged),
        (_, ReviewAction::Resolve) => Ok(AlertStatus::Resolved),
    }
}

#[derive(Debug, Clone)]
pub enum GenerateOutcome {
    /// Score at or above the alert threshold.
    Healthy(HealthAssessment),
    /// Unhealthy, but no numeric anomaly to anchor an alert on.
    Unanchored(HealthAssessment),
    /// An open alert already exists for the primary anomaly.
    Existing(Alert),
    Created(Alert),
}

/// An alert as shown to reviewers, with its assessment derived at read time.
#[derive(Debug, Clone, Serialize)]
pub struct AlertView {
    pub id: Uuid,
    pub status: AlertStatus,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub region_id: String,
    pub sector_id: String,
    pub assessment: HealthAssessment,
    pub recommendations: Vec<String>,
    /// Assessment captured when the alert was raised.
    pub snapshot: Option<serde_json::Value>,
}

pub struct AlertCoordinator<'a> {
    store: &'a dyn Store,
    config: &'a EngineConfig,
}

impl<'a> AlertCoordinator<'a> {
    pub fn new(store: &'a dyn Store, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    pub async fn generate(&self, region_id: &str, sector_id: &str) -> Result<GenerateOutcome> {
        let assessment =
            fusion::assess_scope(self.store, region_id, sector_id, self.config, Utc::now()).await?;

        if assessment.score >= self.config.fusion.alert_threshold {
            info!(region = region_id, sector = sector_id, score = assessment.score, "scope healthy");
            return Ok(GenerateOutcome::Healthy(assessment));
        }

        let Some(anomaly_id) = assessment.primary_anomaly else {
            warn!(
                region = region_id,
                sector = sector_id,
                score = assessment.score,
                "unhealthy scope has no numeric anomaly to anchor an alert"
            );
            return Ok(GenerateOutcome::Unanchored(assessment));
        };

        let recommendations =
            fusion::recommendations(assessment.severity, &assessment.evidence, &self.config.fusion);
        let snapshot = serde_json::to_value(&assessment)?;
        let (alert, created) = self
            .store
            .create_alert_if_absent(anomaly_id, &recommendations, snapshot)
            .await?;

        if created {
            info!(alert = %alert.id, anomaly = %anomaly_id, severity = %assessment.severity, "alert created");
            Ok(GenerateOutcome::Created(alert))
        } else {
            info!(alert = %alert.id, anomaly = %anomaly_id, "open alert already exists");
            Ok(GenerateOutcome::Existing(alert))
        }
    }

    pub async fn review(
        &self,
        alert_id: Uuid,
        action: &str,
        reviewer: &str,
        comments: Option<&str>,
    ) -> Result<Alert> {
        let action: ReviewAction = action.parse()?;
        let record = self
            .store
            .alert(alert_id)
            .await?
            .ok_or(EngineError::NotFound(alert_id))?;

        let current = record.alert.status;
        let next = transition(current, action)?;
        if current.is_terminal() {
            return Ok(record.alert);
        }

        let assignee = (action == ReviewAction::Acknowledge).then_some(reviewer);
        if !self.store.update_alert(alert_id, next, assignee).await? {
            // Resolved (or gone) since the read above.
            let latest = self
                .store
                .alert(alert_id)
                .await?
                .ok_or(EngineError::NotFound(alert_id))?;
            warn!(alert = %alert_id, %action, status = %latest.alert.status, "alert changed during review");
            transition(latest.alert.status, action)?;
            return Ok(latest.alert);
        }
        self.store
            .record_review(&ReviewEntry {
                alert_id,
                reviewer: reviewer.to_string(),
                action: action.as_str().to_string(),
                comments: comments.map(str::to_string),
                reviewed_at: Utc::now(),
            })
            .await?;
        info!(alert = %alert_id, from = %current, to = %next, reviewer, "alert reviewed");

        let updated = self
            .store
            .alert(alert_id)
            .await?
            .ok_or(EngineError::NotFound(alert_id))?;
        Ok(updated.alert)
    }

    pub async fn get(&self, alert_id: Uuid) -> Result<AlertView> {
        let record = self
            .store
            .alert(alert_id)
            .await?
            .ok_or(EngineError::NotFound(alert_id))?;
        self.view(record).await
    }

    pub async fn list(&self, region_id: Option<&str>) -> Result<Vec<AlertView>> {
        let mut views = Vec::new();
        for record in self.store.alerts(region_id).await? {
            views.push(self.view(record).await?);
        }
        Ok(views)
    }

    /// Explanation from the collaborator when it answers, otherwise the
    /// templated fallback.
    pub async fn explain(&self, alert_id: Uuid, explainer: Option<&dyn Explainer>) -> Result<String> {
        let view = self.get(alert_id).await?;

        if let Some(explainer) = explainer {
            match explainer.explain(&explain::build_prompt(&view)).await {
                Ok(Some(text)) => return Ok(text),
                Ok(None) => warn!(alert = %alert_id, "explainer returned no text, using template"),
                Err(e) => warn!(alert = %alert_id, error = %e, "explainer failed, using template"),
            }
        }

        Ok(explain::fallback_explanation(&view))
    }

    async fn view(&self, record: AlertRecord) -> Result<AlertView> {
        let assessment = fusion::assess_scope(
            self.store,
            &record.region_id,
            &record.sector_id,
            self.config,
            Utc::now(),
        )
        .await?;

        let alert = record.alert;
        Ok(AlertView {
            id: alert.id,
            status: alert.status,
            assignee: alert.assignee,
            created_at: alert.created_at,
            region_id: record.region_id,
            sector_id: record.sector_id,
            assessment,
            recommendations: alert.recommendations.into_iter().map(|r| r.content).collect(),
            snapshot: record.snapshot,
        })
    }
}
