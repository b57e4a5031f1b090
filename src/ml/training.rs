//! Training pipeline for the visitor models

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ndarray::{Array2, Axis};
use serde::Serialize;

use crate::config::ModelConfig;
use crate::error::{Result, ZooError};
use crate::traits::Clock;
use crate::visitors::{self, ClassLabel, ClassThresholds, VisitorRecord};
use crate::weather::WeatherRecord;

use super::features::{FeatureVectorizer, PredictorSchema};
use super::metrics::{self, ClassifierScores, RegressionScores};
use super::model::{ClassifierBuilder, ModelKind, RegressorBuilder, VisitorClassifier, VisitorRegressor};
use super::persistence::{FittedModel, PersistedModel};

/// Settings for a training run
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    /// Cross-validation folds; 0 skips estimation
    pub folds: usize,
    pub ridge_penalty: f64,
    pub classifier_alpha: f64,
    pub max_iterations: u64,
    pub schema: PredictorSchema,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

impl From<&ModelConfig> for TrainingOptions {
    fn from(config: &ModelConfig) -> Self {
        Self {
            folds: config.cv_folds,
            ridge_penalty: config.ridge_penalty,
            classifier_alpha: config.classifier_alpha,
            max_iterations: config.max_iterations,
            schema: PredictorSchema::default(),
        }
    }
}

/// Weather and visitor rows joined by date, ready for fitting.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub dates: Vec<NaiveDate>,
    pub features: Array2<f64>,
    pub visitor_counts: Vec<f64>,
    pub visitor_classes: Vec<ClassLabel>,
    /// Counts divided by their weekday mean; diagnostic only
    pub normalized_visitors: Vec<f64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Summary of a training run, printed by the `train` command
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub rows: usize,
    pub unmatched_weather: usize,
    pub unmatched_visitors: usize,
    pub class_counts: BTreeMap<ClassLabel, usize>,
    pub classifier_scores: Option<ClassifierScores>,
    pub regression_scores: Option<RegressionScores>,
}

/// Result of a training run
#[derive(Debug)]
pub struct TrainingResult {
    pub classifier: PersistedModel,
    pub regressor: PersistedModel,
    pub report: TrainingReport,
}

/// Fits the classifier and regressor on historical data.
pub struct ModelBuilder {
    data: TrainingSet,
    options: TrainingOptions,
    class_counts: BTreeMap<ClassLabel, usize>,
    unmatched_weather: usize,
    unmatched_visitors: usize,
}

impl ModelBuilder {
    /// Clean and join the historical data.
    ///
    /// Visitor classes are re-derived from the counts with `classes`. Dates
    /// present on only one side are dropped.
    pub fn new(
        weather: &[WeatherRecord],
        visitor_records: &[VisitorRecord],
        classes: &ClassThresholds,
        options: TrainingOptions,
    ) -> Result<Self> {
        options.schema.validate()?;

        let mut weather_by_date: BTreeMap<NaiveDate, WeatherRecord> = BTreeMap::new();
        for record in weather {
            if weather_by_date.insert(record.date, record.cleaned()).is_some() {
                tracing::warn!("Duplicate weather record for {}, keeping the last", record.date);
            }
        }

        let mut visitors_by_date: BTreeMap<NaiveDate, VisitorRecord> = BTreeMap::new();
        for record in visitor_records {
            let record = VisitorRecord::new(record.date, record.visitor_count, classes);
            if let Some(previous) = visitors_by_date.insert(record.date, record) {
                tracing::warn!("Duplicate visitor count for {}, keeping the last", previous.date);
            }
        }

        let mut joined_weather = Vec::new();
        let mut joined_visitors = Vec::new();
        for (date, visitor) in &visitors_by_date {
            if let Some(w) = weather_by_date.get(date) {
                joined_weather.push(w.clone());
                joined_visitors.push(visitor.clone());
            }
        }

        let rows = joined_visitors.len();
        let unmatched_weather = weather_by_date.len() - rows;
        let unmatched_visitors = visitors_by_date.len() - rows;
        tracing::info!(
            "Joined {} rows ({} weather-only and {} visitor-only dates dropped)",
            rows,
            unmatched_weather,
            unmatched_visitors
        );

        if rows == 0 {
            return Err(ZooError::TrainingData {
                rows,
                folds: options.folds,
            });
        }

        let mut class_counts: BTreeMap<ClassLabel, usize> =
            classes.labels().into_iter().map(|l| (l, 0)).collect();
        for v in &joined_visitors {
            *class_counts.entry(v.visitor_class()).or_insert(0) += 1;
        }
        for (label, count) in &class_counts {
            if *count == 0 {
                tracing::warn!(
                    "Visitor class {} has no training examples; the classifier will never predict it",
                    label
                );
            }
        }

        let features = FeatureVectorizer::new(options.schema.clone()).vectorize(&joined_weather)?;

        let data = TrainingSet {
            dates: joined_visitors.iter().map(|v| v.date).collect(),
            features,
            visitor_counts: joined_visitors
                .iter()
                .map(|v| f64::from(v.visitor_count))
                .collect(),
            visitor_classes: joined_visitors.iter().map(|v| v.visitor_class()).collect(),
            normalized_visitors: visitors::normalized_by_weekday(&joined_visitors),
        };

        Ok(Self {
            data,
            options,
            class_counts,
            unmatched_weather,
            unmatched_visitors,
        })
    }

    pub fn data(&self) -> &TrainingSet {
        &self.data
    }

    pub fn class_counts(&self) -> &BTreeMap<ClassLabel, usize> {
        &self.class_counts
    }

    fn classifier_builder(&self) -> ClassifierBuilder {
        ClassifierBuilder::new()
            .alpha(self.options.classifier_alpha)
            .max_iterations(self.options.max_iterations)
    }

    fn regressor_builder(&self) -> RegressorBuilder {
        RegressorBuilder::new().ridge_penalty(self.options.ridge_penalty)
    }

    fn folds(&self) -> Result<Option<Vec<metrics::Fold>>> {
        let folds = self.options.folds;
        let rows = self.data.len();
        if folds == 0 {
            return Ok(None);
        }
        // A single fold leaves nothing to train on
        if folds == 1 || rows < folds {
            return Err(ZooError::TrainingData { rows, folds });
        }
        Ok(Some(metrics::k_fold(rows, folds)))
    }

    /// Fit the classifier, with per-fold accuracy when folds > 0.
    pub fn build_classifier(&self) -> Result<(VisitorClassifier, Option<ClassifierScores>)> {
        let schema = &self.options.schema;
        let builder = self.classifier_builder();

        let scores = match self.folds()? {
            None => None,
            Some(folds) => {
                let mut scores = ClassifierScores::default();
                for fold in folds {
                    let x_train = self.data.features.select(Axis(0), &fold.train);
                    let y_train: Vec<ClassLabel> =
                        fold.train.iter().map(|i| self.data.visitor_classes[*i]).collect();
                    let model = builder.fit(schema, &x_train, &y_train)?;

                    let x_test = self.data.features.select(Axis(0), &fold.test);
                    let y_test: Vec<ClassLabel> =
                        fold.test.iter().map(|i| self.data.visitor_classes[*i]).collect();
                    let predicted = model.predict_matrix(&x_test)?;
                    scores
                        .accuracy
                        .push(metrics::accuracy(&predicted, &y_test).unwrap_or(0.0));
                }
                tracing::info!(
                    "Classifier cross-validation accuracy: {:.3} over {} folds",
                    scores.mean_accuracy(),
                    scores.accuracy.len()
                );
                Some(scores)
            }
        };

        let model = builder.fit(schema, &self.data.features, &self.data.visitor_classes)?;
        Ok((model, scores))
    }

    /// Fit the regressor, with per-fold error metrics when folds > 0.
    pub fn build_regressor(&self) -> Result<(VisitorRegressor, Option<RegressionScores>)> {
        let schema = &self.options.schema;
        let builder = self.regressor_builder();

        let scores = match self.folds()? {
            None => None,
            Some(folds) => {
                let mut scores = RegressionScores::default();
                for fold in folds {
                    let x_train = self.data.features.select(Axis(0), &fold.train);
                    let y_train: Vec<f64> =
                        fold.train.iter().map(|i| self.data.visitor_counts[*i]).collect();
                    let model = builder.fit(schema, &x_train, &y_train)?;

                    let x_test = self.data.features.select(Axis(0), &fold.test);
                    let y_test: Vec<f64> =
                        fold.test.iter().map(|i| self.data.visitor_counts[*i]).collect();
                    let predicted = model.predict_matrix(&x_test)?;

                    // Folds are never empty, so the metrics are always defined
                    if let (Some(mae), Some(mse), Some(median)) = (
                        metrics::mean_absolute_error(&predicted, &y_test),
                        metrics::mean_squared_error(&predicted, &y_test),
                        metrics::median_absolute_error(&predicted, &y_test),
                    ) {
                        scores.mean_absolute_error.push(mae);
                        scores.mean_squared_error.push(mse);
                        scores.median_absolute_error.push(median);
                    }
                }
                tracing::info!(
                    "Regressor cross-validation: MAE {:.1}, MSE {:.1}, median AE {:.1}",
                    scores.mean_mae(),
                    scores.mean_mse(),
                    scores.mean_median_ae()
                );
                Some(scores)
            }
        };

        let model = builder.fit(schema, &self.data.features, &self.data.visitor_counts)?;
        Ok((model, scores))
    }

    /// Build both models and wrap them for persistence.
    pub fn train<C: Clock>(&self, clock: &C) -> Result<TrainingResult> {
        let (classifier, classifier_scores) = self.build_classifier()?;
        let (regressor, regression_scores) = self.build_regressor()?;

        let trained_at = clock.now_utc();
        let stamp = trained_at.format("%Y-%m-%dT%H:%M:%SZ");
        let samples = self.data.len();

        Ok(TrainingResult {
            classifier: PersistedModel::new(
                format!("{} {}", ModelKind::Classifier, stamp),
                trained_at,
                samples,
                FittedModel::Classifier(classifier),
            ),
            regressor: PersistedModel::new(
                format!("{} {}", ModelKind::Regressor, stamp),
                trained_at,
                samples,
                FittedModel::Regressor(regressor),
            ),
            report: TrainingReport {
                rows: samples,
                unmatched_weather: self.unmatched_weather,
                unmatched_visitors: self.unmatched_visitors,
                class_counts: self.class_counts.clone(),
                classifier_scores,
                regression_scores,
            },
        })
    }
}
