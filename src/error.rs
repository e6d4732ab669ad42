use uuid::Uuid;

use crate::models::AlertStatus;

/// Errors surfaced by the analytics runners and the alert coordinator.
///
/// Insufficient data is never an error here: detectors and baselines report
/// it as `None`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("alert {0} not found")]
    NotFound(Uuid),

    #[error("unknown review action: {0}")]
    UnknownAction(String),

    #[error("unknown detection method: {0}")]
    UnknownMethod(String),

    #[error("cannot {action} an alert that is {from}")]
    InvalidTransition { from: AlertStatus, action: String },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
