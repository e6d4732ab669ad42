use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::deviation::DetectionMethod;
use crate::error::Result;
use crate::models::{
    Alert, AlertRecord, AlertStatus, AnomalyEvent, Baseline, NewAnomaly, NumericObservation,
    Recommendation, ReviewEntry, ScopedAnomaly, SeriesKey, Signal, TextObservation, TextSource,
};
use crate::store::Store;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loads two regions of demo data: a water sector with a pressure collapse in
/// `chennai-north`, a steady power sector, and a week of citizen reports.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let signal = |id: &str, name: &str, sector: &str, unit: &str| -> anyhow::Result<Signal> {
        Ok(Signal {
            id: Uuid::parse_str(id)?,
            name: name.to_string(),
            sector_id: sector.to_string(),
            unit: unit.to_string(),
            frequency: "daily".to_string(),
        })
    };
    let signals = vec![
        signal("6b1f4c0e-8a53-4a55-9d2e-0f6a4c1b7e21", "Water Pressure", "water", "psi")?,
        signal("a9e3d2f4-1c7b-4f0a-8e55-3b2d9c6f1a08", "Groundwater Level", "water", "m")?,
        signal("2f8c7a61-5d04-4b3e-bc19-7e4a0d9f3c52", "Grid Load", "power", "MW")?,
    ];

    for s in &signals {
        sqlx::query(
            r#"
            INSERT INTO civic_radar.signals (id, name, sector_id, unit, frequency)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE
            SET sector_id = EXCLUDED.sector_id, unit = EXCLUDED.unit, frequency = EXCLUDED.frequency
            "#,
        )
        .bind(s.id)
        .bind(&s.name)
        .bind(&s.sector_id)
        .bind(&s.unit)
        .bind(&s.frequency)
        .execute(pool)
        .await?;
    }

    let today = Utc::now()
        .date_naive()
        .and_hms_opt(6, 0, 0)
        .context("invalid seed time")?
        .and_utc();

    let series: Vec<(Uuid, &str, Vec<f64>)> = vec![
        (
            signals[0].id,
            "chennai-north",
            vec![42.0, 41.5, 43.0, 42.2, 41.8, 42.6, 43.1, 42.0, 41.7, 42.4, 12.5],
        ),
        (
            signals[0].id,
            "madurai-east",
            vec![38.0, 38.4, 37.9, 38.2, 38.1, 37.8, 38.3, 38.0, 38.2, 37.9, 38.1],
        ),
        (
            signals[1].id,
            "chennai-north",
            vec![8.1, 8.0, 7.9, 7.8, 7.6, 7.5, 7.1, 6.8, 6.4, 6.0, 5.5],
        ),
        (
            signals[2].id,
            "chennai-north",
            vec![310.0, 305.0, 312.0, 308.0, 311.0, 309.0, 307.0, 310.0, 306.0, 309.0, 308.0],
        ),
    ];

    for (signal_id, region, values) in series {
        let start = today - Duration::days(values.len() as i64 - 1);
        for (i, value) in values.into_iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO civic_radar.numeric_observations (signal_id, region_id, observed_at, value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (signal_id, region_id, observed_at) DO NOTHING
                "#,
            )
            .bind(signal_id)
            .bind(region)
            .bind(start + Duration::days(i as i64))
            .bind(value)
            .execute(pool)
            .await?;
        }
    }

    let reports = vec![
        (
            Uuid::parse_str("c4d1a7e2-3b9f-4e61-a0d8-5f2c7b1e9a34")?,
            "chennai-north",
            1,
            "No water supply since Monday, pipeline leakage near the school",
            TextSource::CitizenReport,
        ),
        (
            Uuid::parse_str("e7b2f9a1-6c4d-4a83-9e15-2d8b0c3f7a69")?,
            "chennai-north",
            1,
            "Dirty water from the tap, very bad smell, worst service",
            TextSource::CitizenReport,
        ),
        (
            Uuid::parse_str("1a9c3e5f-7b2d-4f80-b6e4-9c0a2d4f6b13")?,
            "chennai-north",
            2,
            "குடிநீர் இல்லை, தாமதம் தொடர்கிறது",
            TextSource::CitizenReport,
        ),
        (
            Uuid::parse_str("5e8a0c2f-4d6b-4a19-8f37-1b3d5e7a9c20")?,
            "chennai-north",
            3,
            "Valve pressure dropped at pumping station 4",
            TextSource::FieldRecord,
        ),
        (
            Uuid::parse_str("9f0b2d4e-6a8c-4e13-a5b7-c9d1e3f5a7b8")?,
            "madurai-east",
            2,
            "Supply restored, thank you for the quick repair",
            TextSource::CitizenReport,
        ),
    ];

    for (id, region, days_ago, body, source) in reports {
        sqlx::query(
            r#"
            INSERT INTO civic_radar.text_observations (id, region_id, observed_at, body, source)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(region)
        .bind(today - Duration::days(days_ago))
        .bind(body)
        .bind(source.as_str())
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Postgres-backed [`Store`] over the `civic_radar` schema.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_err(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn anomaly_from_row(row: &PgRow) -> Result<AnomalyEvent> {
    let method: String = row.try_get("method")?;
    Ok(AnomalyEvent {
        id: row.try_get("id")?,
        signal_id: row.try_get("signal_id")?,
        region_id: row.try_get("region_id")?,
        observed_at: row.try_get("observed_at")?,
        severity: row.try_get("severity")?,
        method: method.parse::<DetectionMethod>()?,
        description: row.try_get("description")?,
    })
}

fn text_from_row(row: &PgRow) -> Result<TextObservation> {
    let source: String = row.try_get("source")?;
    Ok(TextObservation {
        id: row.try_get("id")?,
        region_id: row.try_get("region_id")?,
        observed_at: row.try_get("observed_at")?,
        body: row.try_get("body")?,
        source: source.parse::<TextSource>().map_err(decode_err)?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    let status: String = row.try_get("status")?;
    Ok(Alert {
        id: row.try_get("id")?,
        anomaly_id: row.try_get("anomaly_id")?,
        status: status.parse::<AlertStatus>().map_err(decode_err)?,
        assignee: row.try_get("assignee")?,
        created_at: row.try_get("created_at")?,
        recommendations: Vec::new(),
    })
}

async fn recommendations_for(conn: &mut PgConnection, alert_id: Uuid) -> Result<Vec<Recommendation>> {
    let rows = sqlx::query(
        r#"
        SELECT id, alert_id, content, created_at
        FROM civic_radar.recommendations
        WHERE alert_id = $1
        ORDER BY position
        "#,
    )
    .bind(alert_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut recommendations = Vec::with_capacity(rows.len());
    for row in rows {
        recommendations.push(Recommendation {
            id: row.try_get("id")?,
            alert_id: row.try_get("alert_id")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(recommendations)
}

const ALERT_SELECT: &str = r#"
    SELECT a.id, a.anomaly_id, a.status, a.assignee, a.created_at, a.snapshot,
           e.region_id, s.sector_id
    FROM civic_radar.alerts a
    JOIN civic_radar.anomaly_events e ON e.id = a.anomaly_id
    JOIN civic_radar.signals s ON s.id = e.signal_id
"#;

#[async_trait]
impl Store for PgStore {
    async fn series(&self, signal: Option<Uuid>, region: Option<&str>) -> Result<Vec<SeriesKey>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT signal_id, region_id
            FROM civic_radar.numeric_observations
            WHERE ($1::uuid IS NULL OR signal_id = $1)
              AND ($2::text IS NULL OR region_id = $2)
            ORDER BY signal_id, region_id
            "#,
        )
        .bind(signal)
        .bind(region)
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(SeriesKey {
                signal_id: row.try_get("signal_id")?,
                region_id: row.try_get("region_id")?,
            });
        }
        Ok(keys)
    }

    async fn recent_observations(
        &self,
        key: &SeriesKey,
        limit: usize,
    ) -> Result<Vec<NumericObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT signal_id, region_id, observed_at, value
            FROM civic_radar.numeric_observations
            WHERE signal_id = $1 AND region_id = $2
            ORDER BY observed_at DESC
            LIMIT $3
            "#,
        )
        .bind(key.signal_id)
        .bind(&key.region_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut observations = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            observations.push(NumericObservation {
                signal_id: row.try_get("signal_id")?,
                region_id: row.try_get("region_id")?,
                observed_at: row.try_get("observed_at")?,
                value: row.try_get("value")?,
            });
        }
        Ok(observations)
    }

    async fn upsert_baseline(&self, baseline: &Baseline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO civic_radar.baselines (signal_id, region_id, mean, std_dev, computed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (signal_id, region_id) DO UPDATE
            SET mean = EXCLUDED.mean, std_dev = EXCLUDED.std_dev, computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(baseline.signal_id)
        .bind(&baseline.region_id)
        .bind(baseline.mean)
        .bind(baseline.std_dev)
        .bind(baseline.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn baselines(&self, signal: Option<Uuid>, region: Option<&str>) -> Result<Vec<Baseline>> {
        let rows = sqlx::query(
            r#"
            SELECT signal_id, region_id, mean, std_dev, computed_at
            FROM civic_radar.baselines
            WHERE ($1::uuid IS NULL OR signal_id = $1)
              AND ($2::text IS NULL OR region_id = $2)
            ORDER BY signal_id, region_id
            "#,
        )
        .bind(signal)
        .bind(region)
        .fetch_all(&self.pool)
        .await?;

        let mut baselines = Vec::with_capacity(rows.len());
        for row in rows {
            baselines.push(Baseline {
                signal_id: row.try_get("signal_id")?,
                region_id: row.try_get("region_id")?,
                mean: row.try_get("mean")?,
                std_dev: row.try_get("std_dev")?,
                computed_at: row.try_get("computed_at")?,
            });
        }
        Ok(baselines)
    }

    async fn insert_anomaly(&self, anomaly: NewAnomaly) -> Result<Option<AnomalyEvent>> {
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO civic_radar.anomaly_events
            (id, signal_id, region_id, observed_at, severity, method, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (signal_id, region_id, observed_at) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(anomaly.signal_id)
        .bind(&anomaly.region_id)
        .bind(anomaly.observed_at)
        .bind(anomaly.severity)
        .bind(anomaly.method.as_str())
        .bind(&anomaly.description)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.map(|_| AnomalyEvent {
            id,
            signal_id: anomaly.signal_id,
            region_id: anomaly.region_id,
            observed_at: anomaly.observed_at,
            severity: anomaly.severity,
            method: anomaly.method,
            description: anomaly.description,
        }))
    }

    async fn sector_anomalies(
        &self,
        region: &str,
        sector: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScopedAnomaly>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.signal_id, e.region_id, e.observed_at, e.severity, e.method,
                   e.description, s.name AS signal_name
            FROM civic_radar.anomaly_events e
            JOIN civic_radar.signals s ON s.id = e.signal_id
            WHERE e.region_id = $1 AND s.sector_id = $2
              AND e.observed_at >= $3 AND e.observed_at <= $4
            ORDER BY e.observed_at
            "#,
        )
        .bind(region)
        .bind(sector)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut anomalies = Vec::with_capacity(rows.len());
        for row in &rows {
            anomalies.push(ScopedAnomaly {
                event: anomaly_from_row(row)?,
                signal_name: row.try_get("signal_name")?,
            });
        }
        Ok(anomalies)
    }

    async fn documents(
        &self,
        region: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TextObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, region_id, observed_at, body, source
            FROM civic_radar.text_observations
            WHERE ($1::text IS NULL OR region_id = $1)
              AND observed_at >= $2 AND observed_at <= $3
            ORDER BY observed_at, id
            "#,
        )
        .bind(region)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(text_from_row).collect()
    }

    async fn documents_before(
        &self,
        region: Option<&str>,
        from: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<TextObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, region_id, observed_at, body, source
            FROM civic_radar.text_observations
            WHERE ($1::text IS NULL OR region_id = $1)
              AND observed_at >= $2 AND observed_at < $3
            ORDER BY observed_at, id
            "#,
        )
        .bind(region)
        .bind(from)
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(text_from_row).collect()
    }

    async fn create_alert_if_absent(
        &self,
        anomaly_id: Uuid,
        recommendations: &[String],
        snapshot: serde_json::Value,
    ) -> Result<(Alert, bool)> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent generators anchored on the same anomaly.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(anomaly_id.to_string())
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query(
            r#"
            SELECT id, anomaly_id, status, assignee, created_at
            FROM civic_radar.alerts
            WHERE anomaly_id = $1 AND status <> 'RESOLVED'
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(anomaly_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let mut alert = alert_from_row(&row)?;
            alert.recommendations = recommendations_for(&mut tx, alert.id).await?;
            tx.commit().await?;
            return Ok((alert, false));
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO civic_radar.alerts (id, anomaly_id, status, snapshot, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(anomaly_id)
        .bind(AlertStatus::New.as_str())
        .bind(&snapshot)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        let mut stored = Vec::with_capacity(recommendations.len());
        for (position, content) in (0i32..).zip(recommendations) {
            let recommendation = Recommendation {
                id: Uuid::new_v4(),
                alert_id: id,
                content: content.clone(),
                created_at,
            };
            sqlx::query(
                r#"
                INSERT INTO civic_radar.recommendations (id, alert_id, position, content, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(recommendation.id)
            .bind(id)
            .bind(position)
            .bind(&recommendation.content)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
            stored.push(recommendation);
        }

        tx.commit().await?;

        Ok((
            Alert {
                id,
                anomaly_id,
                status: AlertStatus::New,
                assignee: None,
                created_at,
                recommendations: stored,
            },
            true,
        ))
    }

    async fn alert(&self, id: Uuid) -> Result<Option<AlertRecord>> {
        let mut conn = self.pool.acquire().await?;
        let query = format!("{ALERT_SELECT} WHERE a.id = $1");
        let Some(row) = sqlx::query(&query).bind(id).fetch_optional(&mut *conn).await? else {
            return Ok(None);
        };

        let mut alert = alert_from_row(&row)?;
        alert.recommendations = recommendations_for(&mut conn, alert.id).await?;
        Ok(Some(AlertRecord {
            alert,
            region_id: row.try_get("region_id")?,
            sector_id: row.try_get("sector_id")?,
            snapshot: row.try_get("snapshot")?,
        }))
    }

    async fn alerts(&self, region: Option<&str>) -> Result<Vec<AlertRecord>> {
        let mut conn = self.pool.acquire().await?;
        let query = format!(
            "{ALERT_SELECT} WHERE ($1::text IS NULL OR e.region_id = $1) ORDER BY a.created_at DESC"
        );
        let rows = sqlx::query(&query).bind(region).fetch_all(&mut *conn).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut alert = alert_from_row(&row)?;
            alert.recommendations = recommendations_for(&mut conn, alert.id).await?;
            records.push(AlertRecord {
                alert,
                region_id: row.try_get("region_id")?,
                sector_id: row.try_get("sector_id")?,
                snapshot: row.try_get("snapshot")?,
            });
        }
        Ok(records)
    }

    async fn update_alert(&self, id: Uuid, status: AlertStatus, assignee: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE civic_radar.alerts
            SET status = $2, assignee = COALESCE($3, assignee)
            WHERE id = $1 AND status <> 'RESOLVED'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(assignee)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_review(&self, entry: &ReviewEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO civic_radar.review_log
            (id, alert_id, reviewer, action, comments, reviewed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.alert_id)
        .bind(&entry.reviewer)
        .bind(&entry.action)
        .bind(&entry.comments)
        .bind(entry.reviewed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
