//! Batch runs over the store: baselines, deviation detection and text
//! aggregation.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::baseline::{self, BaselineStats};
use crate::config::{BatchConfig, EngineConfig, TextConfig};
use crate::deviation::DetectionMethod;
use crate::error::{EngineError, Result};
use crate::models::{Baseline, NewAnomaly, SeriesKey, TextObservation};
use crate::store::Store;
use crate::text::{self, CorpusInsights, DocumentClassification, Lexicon};

/// Recomputes baselines for every matching series. Returns how many were written.
pub async fn run_baselines(
    store: &dyn Store,
    signal: Option<Uuid>,
    region: Option<&str>,
    config: &BatchConfig,
) -> Result<usize> {
    let mut written = 0;

    for key in store.series(signal, region).await? {
        let values: Vec<f64> = store
            .recent_observations(&key, config.baseline_window)
            .await?
            .into_iter()
            .map(|o| o.value)
            .collect();

        let Some(stats) = baseline::compute(&values) else {
            debug!(signal = %key.signal_id, region = %key.region_id, points = values.len(), "insufficient data for baseline");
            continue;
        };

        store
            .upsert_baseline(&Baseline {
                signal_id: key.signal_id,
                region_id: key.region_id.clone(),
                mean: stats.mean,
                std_dev: stats.std_dev,
                computed_at: Utc::now(),
            })
            .await?;
        written += 1;
    }

    info!(written, "baselines updated");
    Ok(written)
}

/// Evaluates `method` against every stored baseline and records new
/// anomalies. Returns how many events were inserted.
pub async fn run_detection(
    store: &dyn Store,
    method: DetectionMethod,
    signal: Option<Uuid>,
    region: Option<&str>,
    config: &EngineConfig,
) -> Result<usize> {
    let limit = method.window_len(&config.batch, &config.detectors);
    let mut inserted = 0;

    for row in store.baselines(signal, region).await? {
        let key = SeriesKey {
            signal_id: row.signal_id,
            region_id: row.region_id.clone(),
        };
        let observations = store.recent_observations(&key, limit).await?;
        let Some(latest) = observations.last() else {
            continue;
        };

        let window: Vec<f64> = observations.iter().map(|o| o.value).collect();
        let stats = BaselineStats {
            mean: row.mean,
            std_dev: row.std_dev,
        };
        let Some(severity) = method.evaluate(&window, &stats, &config.detectors) else {
            continue;
        };

        let event = store
            .insert_anomaly(NewAnomaly {
                signal_id: latest.signal_id,
                region_id: latest.region_id.clone(),
                observed_at: latest.observed_at,
                severity,
                method,
                description: method.describe(&window, &stats, severity),
            })
            .await?;

        match event {
            Some(event) => {
                info!(anomaly = %event.id, signal = %row.signal_id, region = %row.region_id, %method, severity, "anomaly recorded");
                inserted += 1;
            }
            None => debug!(signal = %row.signal_id, region = %row.region_id, %method, "anomaly already recorded"),
        }
    }

    info!(%method, inserted, "deviation detection finished");
    Ok(inserted)
}

/// Classifies every document in a period.
pub async fn classify_documents(
    store: &dyn Store,
    region: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    lexicon: &Lexicon,
) -> Result<Vec<(TextObservation, DocumentClassification)>> {
    let documents = store.documents(region, from, to).await?;
    Ok(documents
        .into_iter()
        .map(|doc| {
            let classification = text::classify(&doc.body, lexicon);
            (doc, classification)
        })
        .collect())
}

/// Aggregates text for `[from, to]`, comparing keywords against the
/// preceding period of the same length, `[from - (to - from), from)`.
pub async fn text_insights(
    store: &dyn Store,
    region: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    config: &TextConfig,
) -> Result<Option<CorpusInsights>> {
    let previous_from = from
        .checked_sub_signed(to - from)
        .ok_or_else(|| EngineError::Config(format!("period before {from} is out of range")))?;
    let bodies = |docs: Vec<TextObservation>| -> Vec<String> { docs.into_iter().map(|d| d.body).collect() };

    let current = bodies(store.documents(region, from, to).await?);
    let previous = bodies(store.documents_before(region, previous_from, from).await?);

    Ok(text::corpus_insights(&current, &previous, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    async fn seeded_series(store: &MemoryStore, values: &[f64]) -> Uuid {
        let signal = store.add_signal("Water Pressure", "water").await;
        let start = Utc::now() - Duration::hours(values.len() as i64);
        for (i, value) in values.iter().enumerate() {
            store
                .add_observation(signal, "r1", start + Duration::hours(i as i64), *value)
                .await;
        }
        signal
    }

    #[tokio::test]
    async fn baselines_skip_short_series() {
        let store = MemoryStore::new();
        seeded_series(&store, &[10.0, 12.0, 14.0, 16.0]).await;
        let lonely = store.add_signal("Rainfall", "water").await;
        store.add_observation(lonely, "r1", Utc::now(), 3.0).await;

        let written = run_baselines(&store, None, None, &BatchConfig::default()).await.unwrap();
        assert_eq!(written, 1);

        let rows = store.baselines(None, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].mean - 13.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn baselines_are_upserted_not_duplicated() {
        let store = MemoryStore::new();
        let signal = seeded_series(&store, &[10.0, 12.0, 14.0, 16.0]).await;
        let config = BatchConfig::default();
        run_baselines(&store, Some(signal), None, &config).await.unwrap();
        run_baselines(&store, Some(signal), None, &config).await.unwrap();
        assert_eq!(store.baselines(Some(signal), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn baseline_window_limits_history() {
        let store = MemoryStore::new();
        seeded_series(&store, &[1000.0, 10.0, 12.0, 14.0, 16.0]).await;
        let config = BatchConfig {
            baseline_window: 4,
            detection_window: 50,
        };
        run_baselines(&store, None, None, &config).await.unwrap();
        let rows = store.baselines(None, None).await.unwrap();
        assert!((rows[0].mean - 13.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn detection_records_each_breach_once() {
        let store = MemoryStore::new();
        let values = [50.0, 40.0, 60.0, 45.0, 55.0, 50.0, 48.0, 52.0];
        seeded_series(&store, &values).await;
        let config = EngineConfig::default();
        run_baselines(&store, None, None, &config.batch).await.unwrap();

        let signal = store.baselines(None, None).await.unwrap()[0].signal_id;
        store.add_observation(signal, "r1", Utc::now(), 500.0).await;

        let first = run_detection(&store, DetectionMethod::ZScore, None, None, &config)
            .await
            .unwrap();
        let second = run_detection(&store, DetectionMethod::ZScore, None, None, &config)
            .await
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(store.anomaly_count().await, 1);
    }

    #[tokio::test]
    async fn detection_without_breach_inserts_nothing() {
        let store = MemoryStore::new();
        seeded_series(&store, &[50.0, 40.0, 60.0, 45.0, 55.0]).await;
        let config = EngineConfig::default();
        run_baselines(&store, None, None, &config.batch).await.unwrap();

        for method in DetectionMethod::ALL {
            assert_eq!(run_detection(&store, method, None, None, &config).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn insights_compare_with_previous_period() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for _ in 0..3 {
            store.add_document("r1", now - Duration::days(1), "flooding drains blocked").await;
        }
        store.add_document("r1", now - Duration::days(10), "flooding reported").await;
        store.add_document("r2", now - Duration::days(1), "flooding elsewhere").await;

        let insights = text_insights(&store, Some("r1"), now - Duration::days(7), now, &TextConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(insights.total_documents, 3);
        let flooding = insights
            .keyword_surges
            .iter()
            .find(|s| s.keyword == "flooding")
            .unwrap();
        assert_eq!(flooding.previous_count, 1);
        assert_eq!(flooding.growth_percent, 200.0);
    }

    #[tokio::test]
    async fn boundary_document_belongs_to_current_period() {
        let store = MemoryStore::new();
        let to = Utc::now();
        let from = to - Duration::days(7);
        store.add_document("r1", from, "flooding near the market").await;

        let insights = text_insights(&store, Some("r1"), from, to, &TextConfig::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(insights.total_documents, 1);
        let flooding = insights
            .keyword_surges
            .iter()
            .find(|s| s.keyword == "flooding")
            .unwrap();
        assert_eq!(flooding.current_count, 1);
        assert_eq!(flooding.previous_count, 0);

        let previous = store
            .documents_before(Some("r1"), from - Duration::days(7), from)
            .await
            .unwrap();
        assert!(previous.is_empty());
    }

    #[tokio::test]
    async fn classification_covers_every_document() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.add_document("r1", now, "Ration pending for weeks").await;
        store.add_document("r1", now, "லஞ்சம் கேட்கிறார்கள்").await;

        let rows = classify_documents(&store, Some("r1"), now - Duration::days(1), now, &Lexicon::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let tamil = rows.iter().find(|(_, c)| c.language == "ta").unwrap();
        assert_eq!(tamil.1.failure_category, "corruption");
    }
}
