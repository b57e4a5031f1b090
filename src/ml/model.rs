//! Visitor class classifier and visitor count regressor.

use std::fmt;

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use linfa_logistic::{MultiFittedLogisticRegression, MultiLogisticRegression};
use ndarray::{Array1, Array2, Axis, concatenate};
use serde::{Deserialize, Serialize};

use super::features::{FeatureVectorizer, PredictorSchema};
use crate::error::{Result, ZooError};
use crate::visitors::ClassLabel;
use crate::weather::WeatherRecord;

/// Which of the two models an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    Classifier,
    Regressor,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Classifier => "classifier",
            ModelKind::Regressor => "regressor",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn model_error<E: fmt::Display>(e: E) -> ZooError {
    ZooError::Model(e.to_string())
}

fn check_width(schema: &PredictorSchema, x: &Array2<f64>) -> Result<()> {
    if x.ncols() != schema.len() {
        return Err(ZooError::Schema(format!(
            "feature matrix has {} columns but the schema has {}",
            x.ncols(),
            schema.len()
        )));
    }
    Ok(())
}

/// Multinomial logistic regression over visitor classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorClassifier {
    model: MultiFittedLogisticRegression<f64, usize>,
    schema: PredictorSchema,
    labels: Vec<ClassLabel>,
}

impl VisitorClassifier {
    pub fn schema(&self) -> &PredictorSchema {
        &self.schema
    }

    /// Labels seen during training, ascending.
    pub fn labels(&self) -> &[ClassLabel] {
        &self.labels
    }

    /// Predict a class for each row of an already vectorized matrix.
    pub fn predict_matrix(&self, x: &Array2<f64>) -> Result<Vec<ClassLabel>> {
        check_width(&self.schema, x)?;
        if x.nrows() == 0 {
            return Ok(Vec::new());
        }
        let predicted: Array1<usize> = self.model.predict(x);
        Ok(predicted.iter().map(|c| *c as ClassLabel).collect())
    }

    pub fn predict(&self, records: &[WeatherRecord]) -> Result<Vec<ClassLabel>> {
        let x = FeatureVectorizer::new(self.schema.clone()).vectorize(records)?;
        self.predict_matrix(&x)
    }
}

/// Least-squares regressor for raw visitor counts.
///
/// Fitted without an intercept: with the full set of weekday indicators the
/// weekday coefficients act as per-weekday intercepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorRegressor {
    coefficients: Array1<f64>,
    intercept: f64,
    schema: PredictorSchema,
}

impl VisitorRegressor {
    pub fn schema(&self) -> &PredictorSchema {
        &self.schema
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Predict a visitor count for each row. Values are not clamped.
    pub fn predict_matrix(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        check_width(&self.schema, x)?;
        Ok((x.dot(&self.coefficients) + self.intercept).to_vec())
    }

    pub fn predict(&self, records: &[WeatherRecord]) -> Result<Vec<f64>> {
        let x = FeatureVectorizer::new(self.schema.clone()).vectorize(records)?;
        self.predict_matrix(&x)
    }
}

/// Builder for fitting a [`VisitorClassifier`]
#[derive(Debug, Clone)]
pub struct ClassifierBuilder {
    alpha: f64,
    max_iterations: u64,
}

impl Default for ClassifierBuilder {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iterations: 100,
        }
    }
}

impl ClassifierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// L2 regularization strength
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn fit(
        &self,
        schema: &PredictorSchema,
        x: &Array2<f64>,
        y: &[ClassLabel],
    ) -> Result<VisitorClassifier> {
        check_width(schema, x)?;
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(ZooError::Model(format!(
                "cannot fit classifier on {} rows with {} labels",
                x.nrows(),
                y.len()
            )));
        }

        let targets: Array1<usize> = y.iter().map(|c| *c as usize).collect();
        let dataset = Dataset::new(x.clone(), targets);

        let model = MultiLogisticRegression::default()
            .alpha(self.alpha)
            .max_iterations(self.max_iterations)
            .fit(&dataset)
            .map_err(model_error)?;

        let mut labels = y.to_vec();
        labels.sort_unstable();
        labels.dedup();

        Ok(VisitorClassifier {
            model,
            schema: schema.clone(),
            labels,
        })
    }
}

/// Builder for fitting a [`VisitorRegressor`]
#[derive(Debug, Clone)]
pub struct RegressorBuilder {
    ridge_penalty: f64,
}

impl Default for RegressorBuilder {
    fn default() -> Self {
        Self {
            ridge_penalty: 1e-3,
        }
    }
}

impl RegressorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// L2 penalty; keeps the fit defined when an indicator column is all zero.
    pub fn ridge_penalty(mut self, penalty: f64) -> Self {
        self.ridge_penalty = penalty.max(0.0);
        self
    }

    pub fn fit(&self, schema: &PredictorSchema, x: &Array2<f64>, y: &[f64]) -> Result<VisitorRegressor> {
        check_width(schema, x)?;
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(ZooError::Model(format!(
                "cannot fit regressor on {} rows with {} targets",
                x.nrows(),
                y.len()
            )));
        }

        // Ridge as ordinary least squares on rows augmented with sqrt(λ)·I
        let p = x.ncols();
        let penalty = Array2::<f64>::eye(p) * self.ridge_penalty.sqrt();
        let records = concatenate(Axis(0), &[x.view(), penalty.view()]).map_err(model_error)?;
        let mut targets = y.to_vec();
        targets.extend(std::iter::repeat_n(0.0, p));
        let dataset = Dataset::new(records, Array1::from_vec(targets));

        let fitted = LinearRegression::new()
            .with_intercept(false)
            .fit(&dataset)
            .map_err(model_error)?;

        if fitted.params().iter().any(|c| !c.is_finite()) {
            return Err(ZooError::Model(
                "regression produced non-finite coefficients".to_string(),
            ));
        }

        Ok(VisitorRegressor {
            coefficients: fitted.params().clone(),
            intercept: fitted.intercept(),
            schema: schema.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn weather(days: i64) -> Vec<WeatherRecord> {
        let start = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap();
        (0..days)
            .map(|i| WeatherRecord {
                date: start + Duration::days(i),
                temp_max: Some(((i * 7) % 11) as f64 - 5.0),
                temp_min: None,
                temp_mean: None,
                precipitation: Some(((i * 3) % 5) as f64 * 0.5),
                snow_depth: None,
            })
            .collect()
    }

    fn exact_visitors(records: &[WeatherRecord]) -> Vec<f64> {
        let weekday_base = [400.0, 380.0, 420.0, 450.0, 500.0, 900.0, 1000.0];
        records
            .iter()
            .map(|r| {
                weekday_base[r.weekday_index()] + 30.0 * r.temp_max.unwrap_or(0.0)
                    - 50.0 * r.precipitation.unwrap_or(0.0)
            })
            .collect()
    }

    #[test]
    fn test_model_kind_names() {
        assert_eq!(ModelKind::Classifier.to_string(), "classifier");
        assert_eq!(ModelKind::Regressor.as_str(), "regressor");
    }

    #[test]
    fn test_regressor_recovers_linear_relationship() {
        let records = weather(56);
        let schema = PredictorSchema::default();
        let x = FeatureVectorizer::new(schema.clone()).vectorize(&records).unwrap();
        let y = exact_visitors(&records);

        let model = RegressorBuilder::new().ridge_penalty(1e-6).fit(&schema, &x, &y).unwrap();

        assert_eq!(model.coefficients().len(), 9);
        assert_relative_eq!(model.coefficients()[0], 30.0, epsilon = 0.1);
        assert_relative_eq!(model.coefficients()[1], -50.0, epsilon = 0.1);

        let predicted = model.predict(&records[..7]).unwrap();
        for (p, t) in predicted.iter().zip(&y[..7]) {
            assert!((p - t).abs() < 1.0, "predicted {} expected {}", p, t);
        }
    }

    #[test]
    fn test_regressor_handles_missing_weekday() {
        // Only Mondays: six weekday columns are entirely zero
        let records: Vec<_> = weather(70).into_iter().step_by(7).collect();
        let schema = PredictorSchema::default();
        let x = FeatureVectorizer::new(schema.clone()).vectorize(&records).unwrap();
        let y = exact_visitors(&records);

        let model = RegressorBuilder::new().fit(&schema, &x, &y).unwrap();

        assert!(model.coefficients().iter().all(|c| c.is_finite()));
        assert_relative_eq!(model.coefficients()[8], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_regressor_rejects_width_mismatch() {
        let schema = PredictorSchema::new(["temp_max"]);
        let x = Array2::<f64>::zeros((3, 2));
        let result = RegressorBuilder::new().fit(&schema, &x, &[1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(ZooError::Schema(_))));
    }

    #[test]
    fn test_regressor_rejects_empty_data() {
        let schema = PredictorSchema::default();
        let x = Array2::<f64>::zeros((0, 9));
        let result = RegressorBuilder::new().fit(&schema, &x, &[]);
        assert!(matches!(result, Err(ZooError::Model(_))));
    }

    #[test]
    fn test_regressor_prediction_is_not_clamped() {
        let records = weather(28);
        let schema = PredictorSchema::new(["temp_max"]);
        let x = FeatureVectorizer::new(schema.clone()).vectorize(&records).unwrap();
        let y: Vec<f64> = records.iter().map(|r| 100.0 * r.temp_max.unwrap()).collect();

        let model = RegressorBuilder::new().fit(&schema, &x, &y).unwrap();
        let mut cold = records[0].clone();
        cold.temp_max = Some(-20.0);

        assert!(model.predict(&[cold]).unwrap()[0] < 0.0);
    }

    #[test]
    fn test_classifier_predicts_known_labels() {
        let records = weather(56);
        let schema = PredictorSchema::default();
        let x = FeatureVectorizer::new(schema.clone()).vectorize(&records).unwrap();
        let y: Vec<ClassLabel> = records
            .iter()
            .map(|r| if r.weekday_index() >= 5 { 2 } else { 0 })
            .collect();

        let model = ClassifierBuilder::new().fit(&schema, &x, &y).unwrap();

        assert_eq!(model.labels(), &[0, 2]);
        let predicted = model.predict(&records).unwrap();
        assert_eq!(predicted.len(), records.len());
        assert!(predicted.iter().all(|c| *c == 0 || *c == 2));
    }

    #[test]
    fn test_classifier_is_deterministic() {
        let records = weather(42);
        let schema = PredictorSchema::default();
        let x = FeatureVectorizer::new(schema.clone()).vectorize(&records).unwrap();
        let y: Vec<ClassLabel> = records.iter().map(|r| (r.weekday_index() / 3) as u32).collect();

        let a = ClassifierBuilder::new().fit(&schema, &x, &y).unwrap();
        let b = ClassifierBuilder::new().fit(&schema, &x, &y).unwrap();

        assert_eq!(a.predict_matrix(&x).unwrap(), b.predict_matrix(&x).unwrap());
    }

    #[test]
    fn test_classifier_rejects_mismatched_labels() {
        let schema = PredictorSchema::default();
        let x = Array2::<f64>::zeros((4, 9));
        let result = ClassifierBuilder::new().fit(&schema, &x, &[0, 1]);
        assert!(matches!(result, Err(ZooError::Model(_))));
    }

    #[test]
    fn test_builder_customization() {
        let builder = ClassifierBuilder::new().alpha(0.5).max_iterations(10);
        assert_eq!(builder.alpha, 0.5);
        assert_eq!(builder.max_iterations, 10);

        let builder = RegressorBuilder::new().ridge_penalty(-1.0);
        assert_eq!(builder.ridge_penalty, 0.0);
    }
}
