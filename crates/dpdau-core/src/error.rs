//! Error kinds surfaced by the ingest-and-release engine.

use thiserror::Error;

/// Every failure mode the core can produce. None of these are retried internally;
/// callers decide what to do with each.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("budget exceeded for metric '{metric}' on {day}")]
    BudgetExceeded { metric: String, day: String },

    #[error("sketch implementation '{0}' is not registered")]
    SketchUnavailable(String),

    #[error("cannot combine sketch backends: {0}")]
    SketchMismatch(String),

    #[error("durable store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
