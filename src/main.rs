use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod alerts;
mod analytics;
mod baseline;
mod config;
mod db;
mod deviation;
mod error;
mod explain;
mod fusion;
mod models;
mod report;
mod store;
mod text;

use alerts::{AlertCoordinator, GenerateOutcome};
use config::EngineConfig;
use db::PgStore;
use deviation::DetectionMethod;
use explain::{Explainer, HttpExplainer};

#[derive(Parser)]
#[command(name = "civic-radar")]
#[command(about = "Civic signal analytics: baselines, anomaly detection, text insights and alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo signals, observations and citizen reports
    Seed,
    /// Recompute baselines from recent observations
    Baseline {
        #[arg(long)]
        signal: Option<Uuid>,
        #[arg(long)]
        region: Option<String>,
    },
    /// Run a deviation detector (or `all` of them) against stored baselines
    Detect {
        #[arg(long, default_value = "zscore")]
        method: String,
        #[arg(long)]
        signal: Option<Uuid>,
        #[arg(long)]
        region: Option<String>,
    },
    /// Score the health of a region's sector
    Health {
        #[arg(long)]
        region: String,
        #[arg(long)]
        sector: String,
    },
    /// Aggregate citizen text: sentiment, categories, topics and keyword surges
    Insights {
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Classify individual reports by language, sentiment and failure category
    Classify {
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Raise an alert for a region's sector when its health is below threshold
    Generate {
        #[arg(long)]
        region: String,
        #[arg(long)]
        sector: String,
    },
    /// List alerts with live assessments
    Alerts {
        #[arg(long)]
        region: Option<String>,
    },
    /// Show one alert
    Alert { id: Uuid },
    /// Acknowledge or resolve an alert
    Review {
        id: Uuid,
        #[arg(long)]
        action: String,
        #[arg(long)]
        reviewer: String,
        #[arg(long)]
        comments: Option<String>,
    },
    /// Explain an alert in plain language
    Explain { id: Uuid },
    /// Generate a markdown health report for a region
    Report {
        #[arg(long)]
        region: String,
        #[arg(long = "sector", required = true)]
        sectors: Vec<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn explainer_from_env() -> anyhow::Result<Option<HttpExplainer>> {
    let Some(url) = std::env::var("CIVIC_EXPLAINER_URL").ok().filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let timeout_secs = std::env::var("CIVIC_EXPLAINER_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let explainer = HttpExplainer::new(url, Duration::from_secs(timeout_secs))
        .context("failed to build explainer client")?;
    Ok(Some(explainer))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());
    let coordinator = AlertCoordinator::new(&store, &config);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Baseline { signal, region } => {
            let written =
                analytics::run_baselines(&store, signal, region.as_deref(), &config.batch).await?;
            println!("Updated {written} baselines.");
        }
        Commands::Detect {
            method,
            signal,
            region,
        } => {
            let methods = if method.eq_ignore_ascii_case("all") {
                DetectionMethod::ALL.to_vec()
            } else {
                vec![method.parse::<DetectionMethod>()?]
            };
            for method in methods {
                let inserted =
                    analytics::run_detection(&store, method, signal, region.as_deref(), &config)
                        .await?;
                println!("Recorded {inserted} new anomalies with {method}.");
            }
        }
        Commands::Health { region, sector } => {
            let assessment = fusion::assess_scope(&store, &region, &sector, &config, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        Commands::Insights { region, days } => {
            let to = Utc::now();
            let from = config::window_start(to, days)?;
            match analytics::text_insights(&store, region.as_deref(), from, to, &config.text).await? {
                Some(insights) => println!("{}", serde_json::to_string_pretty(&insights)?),
                None => println!("No citizen reports found for this window."),
            }
        }
        Commands::Classify { region, days } => {
            let to = Utc::now();
            let from = config::window_start(to, days)?;
            let rows =
                analytics::classify_documents(&store, region.as_deref(), from, to, &config.text.lexicon)
                    .await?;

            if rows.is_empty() {
                println!("No citizen reports found for this window.");
                return Ok(());
            }

            for (doc, c) in rows {
                println!(
                    "- {} [{} {} {}] {} sentiment {:.2} category {}",
                    doc.id,
                    doc.region_id,
                    doc.observed_at.format("%Y-%m-%d %H:%M"),
                    doc.source.as_str(),
                    c.language,
                    c.sentiment,
                    c.failure_category
                );
            }
        }
        Commands::Generate { region, sector } => match coordinator.generate(&region, &sector).await? {
            GenerateOutcome::Healthy(a) => {
                println!("{region}/{sector} is healthy (score {:.1}); no alert raised.", a.score)
            }
            GenerateOutcome::Unanchored(a) => println!(
                "{region}/{sector} scored {:.1} ({}) but has no numeric anomaly to anchor an alert.",
                a.score, a.severity
            ),
            GenerateOutcome::Existing(alert) => {
                println!("Open alert {} already covers this anomaly ({}).", alert.id, alert.status)
            }
            GenerateOutcome::Created(alert) => {
                println!("Created alert {}.", alert.id);
                for rec in &alert.recommendations {
                    println!("- {}", rec.content);
                }
            }
        },
        Commands::Alerts { region } => {
            let views = coordinator.list(region.as_deref()).await?;
            if views.is_empty() {
                println!("No alerts found.");
                return Ok(());
            }
            for view in views {
                println!(
                    "- {} [{}] {}/{} {} score {:.1}",
                    view.id,
                    view.status,
                    view.region_id,
                    view.sector_id,
                    view.assessment.severity,
                    view.assessment.score
                );
            }
        }
        Commands::Alert { id } => {
            let view = coordinator.get(id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Review {
            id,
            action,
            reviewer,
            comments,
        } => {
            let alert = coordinator
                .review(id, &action, &reviewer, comments.as_deref())
                .await?;
            println!("Alert {} is now {}.", alert.id, alert.status);
        }
        Commands::Explain { id } => {
            let explainer = explainer_from_env()?;
            let text = coordinator
                .explain(id, explainer.as_ref().map(|e| e as &dyn Explainer))
                .await?;
            println!("{text}");
        }
        Commands::Report {
            region,
            sectors,
            out,
        } => {
            let as_of = Utc::now();
            let window_days = config.fusion.window_days;

            let mut assessments = Vec::with_capacity(sectors.len());
            for sector in &sectors {
                assessments.push(fusion::assess_scope(&store, &region, sector, &config, as_of).await?);
            }
            let insights = analytics::text_insights(
                &store,
                Some(region.as_str()),
                config::window_start(as_of, window_days)?,
                as_of,
                &config.text,
            )
            .await?;
            let alerts = coordinator.list(Some(region.as_str())).await?;

            let report = report::build_report(
                &region,
                as_of,
                window_days,
                &assessments,
                insights.as_ref(),
                &alerts,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
