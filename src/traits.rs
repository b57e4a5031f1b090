//! Abstractions for time and persistence to enable testing.
//!
//! This module provides traits for:
//! - `Clock`: Abstracting time access for deterministic testing
//! - `Store`: Abstracting the record store so jobs run against memory in tests

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::error::Result;
use crate::ml::Prediction;
use crate::ml::model::ModelKind;
use crate::ml::persistence::{PersistedModel, StoredModel};
use crate::visitors::VisitorRecord;
use crate::weather::{WeatherRecord, WeatherSource};

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
///
/// This allows injecting mock clocks during testing to create
/// deterministic, reproducible tests for time-dependent logic.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current time in the local timezone.
    fn now_local(&self) -> DateTime<Local>;

    /// The local calendar date.
    fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Mock clock for testing with controllable time.
#[derive(Debug, Clone)]
pub struct MockClock {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock set to the given UTC time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(time)),
        }
    }

    /// Set the mock clock to a new time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *lock(&self.utc_time) = time;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = lock(&self.utc_time);
        *time += duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *lock(&self.utc_time)
    }

    fn now_local(&self) -> DateTime<Local> {
        self.now_utc().with_timezone(&Local)
    }
}

// ==================== Store Trait ====================

/// Append-only record store for weather, visitor counts, predictions and
/// trained models.
///
/// Implemented by [`crate::db::Database`] for PostgreSQL and by
/// [`MemoryStore`] for tests.
#[allow(async_fn_in_trait)]
pub trait Store {
    async fn insert_weather(&self, source: WeatherSource, record: &WeatherRecord) -> Result<i64>;

    async fn weather_on(
        &self,
        source: WeatherSource,
        date: NaiveDate,
    ) -> Result<Option<WeatherRecord>>;

    async fn insert_actual(&self, record: &VisitorRecord) -> Result<i64>;

    async fn actual_on(&self, date: NaiveDate) -> Result<Option<VisitorRecord>>;

    async fn insert_prediction(&self, prediction: &Prediction) -> Result<i64>;

    /// Store a forecast together with the prediction made from it.
    /// Either both rows are written or neither is.
    async fn insert_forecast_prediction(
        &self,
        forecast: &WeatherRecord,
        prediction: &Prediction,
    ) -> Result<(i64, i64)>;

    /// The `n` most recent predictions, newest date first.
    async fn latest_predictions(&self, n: usize) -> Result<Vec<Prediction>>;

    /// Every prediction with the actual count for its date, if recorded.
    /// Newest date first.
    async fn predictions_with_actuals(&self) -> Result<Vec<(Prediction, Option<VisitorRecord>)>>;

    async fn insert_model(&self, model: &PersistedModel) -> Result<i64>;

    /// The most recently trained model of `kind`.
    async fn latest_model(&self, kind: ModelKind) -> Result<Option<StoredModel>>;

    /// Store a freshly trained classifier and regressor as one unit.
    ///
    /// Unless `keep_existing` is set, every older model of either kind is
    /// deleted once the new ones are in place. On failure the previously
    /// stored models are left untouched.
    async fn replace_models(
        &self,
        classifier: &PersistedModel,
        regressor: &PersistedModel,
        keep_existing: bool,
    ) -> Result<(i64, i64)>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    next_id: i64,
    observations: Vec<WeatherRecord>,
    forecasts: Vec<WeatherRecord>,
    actuals: Vec<VisitorRecord>,
    predictions: Vec<(i64, Prediction)>,
    models: Vec<StoredModel>,
}

impl MemoryTables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn weather(&mut self, source: WeatherSource) -> &mut Vec<WeatherRecord> {
        match source {
            WeatherSource::Observation => &mut self.observations,
            WeatherSource::Forecast => &mut self.forecasts,
        }
    }

    fn push_model(&mut self, model: &PersistedModel, blob: Vec<u8>) -> i64 {
        let id = self.next_id();
        self.models.push(StoredModel {
            id,
            kind: model.kind(),
            name: model.name.clone(),
            trained_at: model.trained_at,
            blob,
        });
        id
    }

    fn sorted_predictions(&self) -> Vec<Prediction> {
        let mut rows = self.predictions.clone();
        rows.sort_by(|(a_id, a), (b_id, b)| b.date.cmp(&a.date).then(b_id.cmp(a_id)));
        rows.into_iter().map(|(_, p)| p).collect()
    }
}

/// In-memory [`Store`] for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prediction_count(&self) -> usize {
        lock(&self.tables).predictions.len()
    }

    pub fn weather_count(&self, source: WeatherSource) -> usize {
        lock(&self.tables).weather(source).len()
    }

    pub fn model_count(&self, kind: ModelKind) -> usize {
        lock(&self.tables).models.iter().filter(|m| m.kind == kind).count()
    }
}

impl Store for MemoryStore {
    async fn insert_weather(&self, source: WeatherSource, record: &WeatherRecord) -> Result<i64> {
        let mut tables = lock(&self.tables);
        let id = tables.next_id();
        tables.weather(source).push(record.clone());
        Ok(id)
    }

    async fn weather_on(
        &self,
        source: WeatherSource,
        date: NaiveDate,
    ) -> Result<Option<WeatherRecord>> {
        let mut tables = lock(&self.tables);
        Ok(tables.weather(source).iter().rev().find(|r| r.date == date).cloned())
    }

    async fn insert_actual(&self, record: &VisitorRecord) -> Result<i64> {
        let mut tables = lock(&self.tables);
        let id = tables.next_id();
        tables.actuals.push(record.clone());
        Ok(id)
    }

    async fn actual_on(&self, date: NaiveDate) -> Result<Option<VisitorRecord>> {
        let tables = lock(&self.tables);
        Ok(tables.actuals.iter().rev().find(|r| r.date == date).cloned())
    }

    async fn insert_prediction(&self, prediction: &Prediction) -> Result<i64> {
        let mut tables = lock(&self.tables);
        let id = tables.next_id();
        tables.predictions.push((id, prediction.clone()));
        Ok(id)
    }

    async fn insert_forecast_prediction(
        &self,
        forecast: &WeatherRecord,
        prediction: &Prediction,
    ) -> Result<(i64, i64)> {
        let mut tables = lock(&self.tables);
        let forecast_id = tables.next_id();
        tables.forecasts.push(forecast.clone());
        let prediction_id = tables.next_id();
        tables.predictions.push((prediction_id, prediction.clone()));
        Ok((forecast_id, prediction_id))
    }

    async fn latest_predictions(&self, n: usize) -> Result<Vec<Prediction>> {
        let tables = lock(&self.tables);
        Ok(tables.sorted_predictions().into_iter().take(n).collect())
    }

    async fn predictions_with_actuals(&self) -> Result<Vec<(Prediction, Option<VisitorRecord>)>> {
        let tables = lock(&self.tables);
        Ok(tables
            .sorted_predictions()
            .into_iter()
            .map(|p| {
                let actual = tables.actuals.iter().rev().find(|a| a.date == p.date).cloned();
                (p, actual)
            })
            .collect())
    }

    async fn insert_model(&self, model: &PersistedModel) -> Result<i64> {
        let blob = model.to_bytes()?;
        Ok(lock(&self.tables).push_model(model, blob))
    }

    async fn latest_model(&self, kind: ModelKind) -> Result<Option<StoredModel>> {
        let tables = lock(&self.tables);
        Ok(tables
            .models
            .iter()
            .filter(|m| m.kind == kind)
            .max_by_key(|m| (m.trained_at, m.id))
            .cloned())
    }

    async fn replace_models(
        &self,
        classifier: &PersistedModel,
        regressor: &PersistedModel,
        keep_existing: bool,
    ) -> Result<(i64, i64)> {
        // Encode both before touching the tables
        let classifier_blob = classifier.to_bytes()?;
        let regressor_blob = regressor.to_bytes()?;

        let mut tables = lock(&self.tables);
        let classifier_id = tables.push_model(classifier, classifier_blob);
        let regressor_id = tables.push_model(regressor, regressor_blob);
        if !keep_existing {
            tables
                .models
                .retain(|m| m.id == classifier_id || m.id == regressor_id);
        }
        Ok((classifier_id, regressor_id))
    }
}
