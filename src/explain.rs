//! Natural-language alert explanations.
//!
//! An external text generator may be configured; whenever it is missing,
//! fails, or returns nothing, the deterministic template is used instead.

use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::alerts::AlertView;

#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("explainer returned status {0}")]
    Status(u16),
}

/// An optional collaborator that turns a prompt into prose.
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, prompt: &str) -> Result<Option<String>, ExplainError>;
}

#[derive(Serialize)]
struct ExplainRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct ExplainResponse {
    text: Option<String>,
}

/// Posts `{"prompt": ...}` to a text-generation endpoint and reads `{"text": ...}`.
pub struct HttpExplainer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExplainer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ExplainError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Explainer for HttpExplainer {
    async fn explain(&self, prompt: &str) -> Result<Option<String>, ExplainError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExplainRequest { prompt })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExplainError::Status(response.status().as_u16()));
        }

        let body: ExplainResponse = response.json().await?;
        Ok(body.text.filter(|t| !t.trim().is_empty()))
    }
}

fn bullet_list(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join("\n  - ")
    }
}

pub fn build_prompt(view: &AlertView) -> String {
    let a = &view.assessment;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "Explain the following civic alert to a district official in at most three sentences."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Alert context:");
    let _ = writeln!(prompt, "- Region: {}, sector: {}", view.region_id, view.sector_id);
    let _ = writeln!(prompt, "- Severity: {}", a.severity);
    let _ = writeln!(prompt, "- Health score: {:.1}/100", a.score);
    let _ = writeln!(prompt, "- Confidence: {}", a.confidence);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Evidence:");
    let _ = writeln!(
        prompt,
        "- Numeric data:\n  - {}",
        bullet_list(&a.evidence.numeric_anomalies, "No specific numeric deviations.")
    );
    let _ = writeln!(
        prompt,
        "- Citizen feedback:\n  - {}",
        bullet_list(&a.evidence.text_insights, "No specific text patterns.")
    );
    let _ = writeln!(prompt, "- Sentiment score: {:.2}", a.evidence.sentiment_score);
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Recommendations:\n  - {}",
        bullet_list(&view.recommendations, "No specific recommendations.")
    );
    let _ = writeln!(prompt);
    let _ = write!(
        prompt,
        "Summarize the root cause and justify the severity level from the evidence."
    );

    prompt
}

/// Deterministic explanation assembled from the evidence bundle.
pub fn fallback_explanation(view: &AlertView) -> String {
    let a = &view.assessment;
    format!(
        "Alert triggered with {} severity (Score: {:.1}). Primary factors include {} numeric deviations and a sentiment score of {:.2}. Review attached evidence for details.",
        a.severity,
        a.score,
        a.evidence.numeric_anomalies.len(),
        a.evidence.sentiment_score
    )
}
