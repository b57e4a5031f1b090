//! Machine learning module for visitor prediction
//!
//! A multinomial logistic classifier predicts the visitor class and a
//! least-squares regressor predicts the raw visitor count, both from the
//! same weather and weekday features.

pub mod features;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod training;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZooError};
use crate::visitors::ClassLabel;
use crate::weather::WeatherRecord;

pub use features::{FeatureVectorizer, PredictorSchema};
pub use model::{ModelKind, VisitorClassifier, VisitorRegressor};
pub use persistence::{PersistedModel, StoredModel};
pub use training::{ModelBuilder, TrainingOptions, TrainingReport, TrainingResult};

/// Predicted visitors for one day, tied to the models that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub date: NaiveDate,
    pub predicted_visitor_count: f64,
    pub predicted_visitor_class: ClassLabel,
    pub classifier_id: Option<i64>,
    pub regression_model_id: Option<i64>,
}

/// Scores forecast weather records with a classifier and a regressor.
///
/// Both models are immutable once trained, so the same predictor may be
/// shared freely.
#[derive(Debug, Clone)]
pub struct VisitorPredictor {
    classifier: VisitorClassifier,
    regressor: VisitorRegressor,
    classifier_id: Option<i64>,
    regression_model_id: Option<i64>,
}

impl VisitorPredictor {
    pub fn new(classifier: VisitorClassifier, regressor: VisitorRegressor) -> Self {
        Self {
            classifier,
            regressor,
            classifier_id: None,
            regression_model_id: None,
        }
    }

    /// Record the store ids of the models, copied into every prediction.
    pub fn with_model_ids(mut self, classifier_id: i64, regression_model_id: i64) -> Self {
        self.classifier_id = Some(classifier_id);
        self.regression_model_id = Some(regression_model_id);
        self
    }

    pub fn from_persisted(classifier: PersistedModel, regressor: PersistedModel) -> Result<Self> {
        Ok(Self::new(
            classifier.into_classifier()?,
            regressor.into_regressor()?,
        ))
    }

    /// Predict visitors for the date of `record`.
    ///
    /// Each model vectorizes the record against its own training schema, so
    /// weekday columns missing from a single record are zero-filled.
    pub fn predict(&self, record: &WeatherRecord) -> Result<Prediction> {
        self.predict_all(std::slice::from_ref(record))?
            .pop()
            .ok_or_else(|| ZooError::Model(format!("no prediction produced for {}", record.date)))
    }

    pub fn predict_all(&self, records: &[WeatherRecord]) -> Result<Vec<Prediction>> {
        let classes = self.classifier.predict(records)?;
        let counts = self.regressor.predict(records)?;

        Ok(records
            .iter()
            .zip(classes)
            .zip(counts)
            .map(|((record, class), count)| {
                tracing::debug!(
                    "Predicted {:.0} visitors (class {}) for {}",
                    count,
                    class,
                    record.date
                );
                Prediction {
                    date: record.date,
                    predicted_visitor_count: count,
                    predicted_visitor_class: class,
                    classifier_id: self.classifier_id,
                    regression_model_id: self.regression_model_id,
                }
            })
            .collect())
    }
}
