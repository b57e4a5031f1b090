//! Error types shared by the prediction pipeline.

use chrono::NaiveDate;
use thiserror::Error;

use crate::ml::persistence::PersistenceError;

/// Errors raised by the library. The binary wraps these in `anyhow`.
#[derive(Debug, Error)]
pub enum ZooError {
    /// The weather service returned a non-2xx status or an empty body.
    #[error("weather fetch failed: {0}")]
    Fetch(String),

    /// Weather XML or CSV could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// No record exists for the requested date.
    #[error("no record for {0}")]
    NotFound(NaiveDate),

    /// Visitor class thresholds (or other configuration) are invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A feature column cannot be produced for the predictor schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// Not enough rows to train or cross-validate.
    #[error("insufficient training data: {rows} rows, {folds} folds requested")]
    TrainingData { rows: usize, folds: usize },

    /// The model library failed to fit or the model is unusable.
    #[error("model error: {0}")]
    Model(String),

    /// Saving or loading a model blob failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = ZooError> = std::result::Result<T, E>;
