//! Model persistence - save and load trained models

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{ModelKind, VisitorClassifier, VisitorRegressor};

/// The fitted model inside a persisted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedModel {
    Classifier(VisitorClassifier),
    Regressor(VisitorRegressor),
}

impl FittedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            FittedModel::Classifier(_) => ModelKind::Classifier,
            FittedModel::Regressor(_) => ModelKind::Regressor,
        }
    }
}

/// A trained model plus metadata, as written to disk or to the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    /// Version for backward compatibility
    pub version: u32,
    pub name: String,
    pub trained_at: DateTime<Utc>,
    /// Number of joined rows the final model was fitted on
    pub training_samples: usize,
    pub model: FittedModel,
}

impl PersistedModel {
    /// Current version number
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(
        name: impl Into<String>,
        trained_at: DateTime<Utc>,
        training_samples: usize,
        model: FittedModel,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            name: name.into(),
            trained_at,
            training_samples,
            model,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.model.kind()
    }

    pub fn into_classifier(self) -> Result<VisitorClassifier, PersistenceError> {
        match self.model {
            FittedModel::Classifier(model) => Ok(model),
            other => Err(PersistenceError::KindMismatch {
                expected: ModelKind::Classifier,
                found: other.kind(),
            }),
        }
    }

    pub fn into_regressor(self) -> Result<VisitorRegressor, PersistenceError> {
        match self.model {
            FittedModel::Regressor(model) => Ok(model),
            other => Err(PersistenceError::KindMismatch {
                expected: ModelKind::Regressor,
                found: other.kind(),
            }),
        }
    }

    /// Serialize to the opaque blob stored in the database.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        bincode::serialize(self).map_err(|e| PersistenceError::Serialize(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let model: Self = bincode::deserialize(bytes)
            .map_err(|e| PersistenceError::Deserialize(e.to_string()))?;

        // Version check
        if model.version > Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: model.version,
            });
        }

        Ok(model)
    }

    /// Save to a file using bincode
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::Io(e.to_string()))?;
        }

        fs::write(path, self.to_bytes()?).map_err(|e| PersistenceError::Io(e.to_string()))?;

        tracing::info!("Saved {} model {:?} to {}", self.kind(), self.name, path.display());
        Ok(())
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            return Err(PersistenceError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let bytes = fs::read(path).map_err(|e| PersistenceError::Io(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} {:?} v{}: {} samples, trained {}",
            self.kind(),
            self.name,
            self.version,
            self.training_samples,
            self.trained_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

/// A persisted model as stored in the `classifier` or `regression_model`
/// table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredModel {
    pub id: i64,
    pub kind: ModelKind,
    pub name: String,
    pub trained_at: DateTime<Utc>,
    pub blob: Vec<u8>,
}

impl StoredModel {
    pub fn decode(&self) -> Result<PersistedModel, PersistenceError> {
        let model = PersistedModel::from_bytes(&self.blob)?;
        if model.kind() != self.kind {
            return Err(PersistenceError::KindMismatch {
                expected: self.kind,
                found: model.kind(),
            });
        }
        Ok(model)
    }
}

/// Errors that can occur during model persistence
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("Model file not found: {0}")]
    FileNotFound(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Model version mismatch: expected v{expected}, found v{found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("Expected a {expected} model, found a {found}")]
    KindMismatch { expected: ModelKind, found: ModelKind },
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone};
    use tempfile::tempdir;

    use super::*;
    use crate::ml::features::{FeatureVectorizer, PredictorSchema};
    use crate::ml::model::RegressorBuilder;
    use crate::weather::WeatherRecord;

    fn create_test_model() -> PersistedModel {
        let start = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap();
        let records: Vec<_> = (0..21)
            .map(|i| {
                let mut r = WeatherRecord::new(start + Duration::days(i));
                r.temp_max = Some(i as f64);
                r.precipitation = Some(0.5);
                r
            })
            .collect();
        let schema = PredictorSchema::default();
        let x = FeatureVectorizer::new(schema.clone()).vectorize(&records).unwrap();
        let y: Vec<f64> = (0..21).map(|i| 500.0 + 10.0 * i as f64).collect();
        let regressor = RegressorBuilder::new().fit(&schema, &x, &y).unwrap();

        PersistedModel::new(
            "test regressor",
            Utc.with_ymd_and_hms(2017, 3, 1, 12, 0, 0).unwrap(),
            21,
            FittedModel::Regressor(regressor),
        )
    }

    #[test]
    fn test_persisted_model_creation() {
        let model = create_test_model();

        assert_eq!(model.version, PersistedModel::CURRENT_VERSION);
        assert_eq!(model.training_samples, 21);
        assert_eq!(model.kind(), ModelKind::Regressor);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");

        let model = create_test_model();
        model.save(&path).unwrap();

        let loaded = PersistedModel::load(&path).unwrap();

        assert_eq!(loaded.name, model.name);
        assert_eq!(loaded.trained_at, model.trained_at);
        let (FittedModel::Regressor(a), FittedModel::Regressor(b)) = (&loaded.model, &model.model)
        else {
            panic!("expected regressors");
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_nonexistent() {
        let path = Path::new("/nonexistent/path/model.bin");
        let result = PersistedModel::load(path);

        assert!(matches!(result, Err(PersistenceError::FileNotFound(_))));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let result = PersistedModel::from_bytes(&[1, 2, 3]);
        assert!(matches!(result, Err(PersistenceError::Deserialize(_))));
    }

    #[test]
    fn test_kind_mismatch() {
        let result = create_test_model().into_classifier();
        assert!(matches!(
            result,
            Err(PersistenceError::KindMismatch {
                expected: ModelKind::Classifier,
                found: ModelKind::Regressor
            })
        ));
    }

    #[test]
    fn test_stored_model_decode_checks_kind() {
        let model = create_test_model();
        let stored = StoredModel {
            id: 1,
            kind: ModelKind::Classifier,
            name: model.name.clone(),
            trained_at: model.trained_at,
            blob: model.to_bytes().unwrap(),
        };
        assert!(stored.decode().is_err());

        let stored = StoredModel {
            kind: ModelKind::Regressor,
            ..stored
        };
        assert_eq!(stored.decode().unwrap().name, "test regressor");
    }

    #[test]
    fn test_summary() {
        let summary = create_test_model().summary();

        assert!(summary.contains("regressor"));
        assert!(summary.contains("21 samples"));
        assert!(summary.contains("2017-03-01 12:00 UTC"));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("dirs").join("model.bin");

        let model = create_test_model();
        let result = model.save(&path);

        assert!(result.is_ok());
        assert!(path.exists());
    }
}
