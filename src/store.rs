use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Alert, AlertRecord, AlertStatus, AnomalyEvent, Baseline, NewAnomaly, NumericObservation,
    ReviewEntry, ScopedAnomaly, SeriesKey, TextObservation,
};

/// Read/write contract between the engine and persistence.
///
/// Check-then-insert operations (`insert_anomaly`, `create_alert_if_absent`)
/// must be atomic inside the implementation; callers do not lock.
#[async_trait]
pub trait Store: Send + Sync {
    /// Distinct numeric series, optionally narrowed to a signal and/or region.
    async fn series(&self, signal: Option<Uuid>, region: Option<&str>) -> Result<Vec<SeriesKey>>;

    /// The `limit` most recent observations of a series, oldest first.
    async fn recent_observations(
        &self,
        key: &SeriesKey,
        limit: usize,
    ) -> Result<Vec<NumericObservation>>;

    async fn upsert_baseline(&self, baseline: &Baseline) -> Result<()>;

    async fn baselines(&self, signal: Option<Uuid>, region: Option<&str>) -> Result<Vec<Baseline>>;

    /// Returns `None` when an event already exists for the same signal,
    /// region and timestamp.
    async fn insert_anomaly(&self, anomaly: NewAnomaly) -> Result<Option<AnomalyEvent>>;

    /// Anomalies on the sector's signals in a region within `[from, to]`.
    async fn sector_anomalies(
        &self,
        region: &str,
        sector: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScopedAnomaly>>;

    /// Text documents within `[from, to]`, for one region or all of them.
    async fn documents(
        &self,
        region: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TextObservation>>;

    /// Text documents within `[from, before)`. A document stamped exactly at
    /// `before` belongs to the period that starts there.
    async fn documents_before(
        &self,
        region: Option<&str>,
        from: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<TextObservation>>;

    /// Returns the open alert anchored on `anomaly_id`, or creates a NEW one
    /// with its recommendations. The flag is `true` when the alert was created.
    async fn create_alert_if_absent(
        &self,
        anomaly_id: Uuid,
        recommendations: &[String],
        snapshot: serde_json::Value,
    ) -> Result<(Alert, bool)>;

    async fn alert(&self, id: Uuid) -> Result<Option<AlertRecord>>;

    async fn alerts(&self, region: Option<&str>) -> Result<Vec<AlertRecord>>;

    /// Sets the status, and the assignee when one is given. Resolved alerts
    /// are never rewritten: returns `false` when the alert is missing or
    /// already RESOLVED.
    async fn update_alert(&self, id: Uuid, status: AlertStatus, assignee: Option<&str>) -> Result<bool>;

    async fn record_review(&self, entry: &ReviewEntry) -> Result<()>;
}
