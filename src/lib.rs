//! Zoo Predict Library
//!
//! Predicts next-day zoo visitor counts from FMI weather forecasts. This
//! module exposes the fetch, parse, training and storage components used by
//! the `zoo-predict` binary for testing and reuse.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod harvest;
pub mod ml;
pub mod parser;
pub mod traits;
pub mod visitors;
pub mod weather;

// Re-export commonly used types
pub use api::FmiClient;
pub use config::AppConfig;
pub use db::Database;
pub use error::{Result, ZooError};
pub use evaluation::{EvaluationMetrics, EvaluationReport, EvaluationRow, evaluate};
pub use harvest::{
    HarvestOutcome, harvest_forecast, harvest_observation_history, harvest_observations,
    record_actual,
};
pub use ml::{
    ModelBuilder, ModelKind, PersistedModel, Prediction, PredictorSchema, StoredModel,
    TrainingOptions, TrainingReport, VisitorPredictor,
};
pub use parser::{ForecastParser, ObservationParser};
pub use traits::{Clock, MemoryStore, MockClock, Store, SystemClock};
pub use visitors::{ClassLabel, ClassThresholds, VisitorRecord};
pub use weather::{WeatherRecord, WeatherSource};
