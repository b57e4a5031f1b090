use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgExecutor, PgPool};

use crate::error::{Result, ZooError};
use crate::ml::Prediction;
use crate::ml::model::ModelKind;
use crate::ml::persistence::{PersistedModel, StoredModel};
use crate::traits::Store;
use crate::visitors::{ClassLabel, VisitorRecord};
use crate::weather::{WeatherRecord, WeatherSource};

#[derive(Debug, FromRow)]
struct VisitorRow {
    date: NaiveDate,
    visitors: i64,
    visitors_class: i64,
}

impl TryFrom<VisitorRow> for VisitorRecord {
    type Error = ZooError;

    fn try_from(row: VisitorRow) -> Result<Self> {
        let visitor_count = u32::try_from(row.visitors).map_err(|_| {
            ZooError::Parse(format!("stored visitor count {} out of range", row.visitors))
        })?;
        Ok(Self::stored(row.date, visitor_count, class_label(row.visitors_class)?))
    }
}

#[derive(Debug, FromRow)]
struct PredictionRow {
    date: NaiveDate,
    visitors: f64,
    visitors_class: i64,
    classifier_id: Option<i64>,
    regression_model_id: Option<i64>,
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = ZooError;

    fn try_from(row: PredictionRow) -> Result<Self> {
        Ok(Self {
            date: row.date,
            predicted_visitor_count: row.visitors,
            predicted_visitor_class: class_label(row.visitors_class)?,
            classifier_id: row.classifier_id,
            regression_model_id: row.regression_model_id,
        })
    }
}

/// A prediction joined with the actual count for its date.
#[derive(Debug, FromRow)]
struct EvaluationRow {
    #[sqlx(flatten)]
    prediction: PredictionRow,
    actual_visitors: Option<i64>,
    actual_class: Option<i64>,
}

#[derive(Debug, FromRow)]
struct ModelRow {
    id: i64,
    name: String,
    trained_at: DateTime<Utc>,
    model: Vec<u8>,
}

fn class_label(value: i64) -> Result<ClassLabel> {
    ClassLabel::try_from(value)
        .map_err(|_| ZooError::Parse(format!("stored visitor class {} out of range", value)))
}

async fn insert_weather_row<'e>(
    executor: impl PgExecutor<'e>,
    source: WeatherSource,
    record: &WeatherRecord,
) -> Result<i64> {
    let sql = match source {
        WeatherSource::Observation => {
            "INSERT INTO weather_observation
             (date, temp_max, temp_min, temp_mean, precipitation, snow_depth)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id"
        }
        WeatherSource::Forecast => {
            "INSERT INTO weather_forecast
             (date, temp_max, temp_min, temp_mean, precipitation, snow_depth)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id"
        }
    };

    let id = sqlx::query_scalar::<_, i64>(sql)
        .bind(record.date)
        .bind(record.temp_max)
        .bind(record.temp_min)
        .bind(record.temp_mean)
        .bind(record.precipitation)
        .bind(record.snow_depth)
        .fetch_one(executor)
        .await?;

    tracing::debug!("Stored {} weather for {} as {}", source.table(), record.date, id);
    Ok(id)
}

async fn insert_prediction_row<'e>(
    executor: impl PgExecutor<'e>,
    prediction: &Prediction,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO zoo_statistic_prediction
         (date, visitors, visitors_class, classifier_id, regression_model_id)
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(prediction.date)
    .bind(prediction.predicted_visitor_count)
    .bind(i64::from(prediction.predicted_visitor_class))
    .bind(prediction.classifier_id)
    .bind(prediction.regression_model_id)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

async fn insert_model_row<'e>(executor: impl PgExecutor<'e>, model: &PersistedModel) -> Result<i64> {
    let sql = match model.kind() {
        ModelKind::Classifier => {
            "INSERT INTO classifier (name, trained_at, model) VALUES ($1, $2, $3) RETURNING id"
        }
        ModelKind::Regressor => {
            "INSERT INTO regression_model (name, trained_at, model) VALUES ($1, $2, $3) RETURNING id"
        }
    };

    let id = sqlx::query_scalar::<_, i64>(sql)
        .bind(&model.name)
        .bind(model.trained_at)
        .bind(model.to_bytes()?)
        .fetch_one(executor)
        .await?;

    tracing::info!("Stored {} {:?} with id {}", model.kind(), model.name, id);
    Ok(id)
}

/// Delete every model of `kind` except `keep`.
async fn delete_models_except<'e>(
    executor: impl PgExecutor<'e>,
    kind: ModelKind,
    keep: i64,
) -> Result<u64> {
    let sql = match kind {
        ModelKind::Classifier => "DELETE FROM classifier WHERE id <> $1",
        ModelKind::Regressor => "DELETE FROM regression_model WHERE id <> $1",
    };

    let result = sqlx::query(sql).bind(keep).execute(executor).await?;
    Ok(result.rows_affected())
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Weather records of `source` between two dates inclusive, oldest first.
    pub async fn weather_between(
        &self,
        source: WeatherSource,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherRecord>> {
        let sql = match source {
            WeatherSource::Observation => {
                "SELECT date, temp_max, temp_min, temp_mean, precipitation, snow_depth
                 FROM weather_observation WHERE date >= $1 AND date <= $2 ORDER BY date ASC, id ASC"
            }
            WeatherSource::Forecast => {
                "SELECT date, temp_max, temp_min, temp_mean, precipitation, snow_depth
                 FROM weather_forecast WHERE date >= $1 AND date <= $2 ORDER BY date ASC, id ASC"
            }
        };

        let records = sqlx::query_as::<_, WeatherRecord>(sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Every recorded visitor count, oldest first.
    pub async fn actuals(&self) -> Result<Vec<VisitorRecord>> {
        let rows = sqlx::query_as::<_, VisitorRow>(
            "SELECT date, visitors, visitors_class FROM zoo_statistic ORDER BY date ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VisitorRecord::try_from).collect()
    }
}

impl Store for Database {
    async fn insert_weather(&self, source: WeatherSource, record: &WeatherRecord) -> Result<i64> {
        insert_weather_row(&self.pool, source, record).await
    }

    async fn weather_on(
        &self,
        source: WeatherSource,
        date: NaiveDate,
    ) -> Result<Option<WeatherRecord>> {
        let sql = match source {
            WeatherSource::Observation => {
                "SELECT date, temp_max, temp_min, temp_mean, precipitation, snow_depth
                 FROM weather_observation WHERE date = $1 ORDER BY id DESC LIMIT 1"
            }
            WeatherSource::Forecast => {
                "SELECT date, temp_max, temp_min, temp_mean, precipitation, snow_depth
                 FROM weather_forecast WHERE date = $1 ORDER BY id DESC LIMIT 1"
            }
        };

        let record = sqlx::query_as::<_, WeatherRecord>(sql)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn insert_actual(&self, record: &VisitorRecord) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO zoo_statistic (date, visitors, visitors_class)
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(record.date)
        .bind(i64::from(record.visitor_count))
        .bind(i64::from(record.visitor_class()))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn actual_on(&self, date: NaiveDate) -> Result<Option<VisitorRecord>> {
        let row = sqlx::query_as::<_, VisitorRow>(
            "SELECT date, visitors, visitors_class FROM zoo_statistic
             WHERE date = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VisitorRecord::try_from).transpose()
    }

    async fn insert_prediction(&self, prediction: &Prediction) -> Result<i64> {
        insert_prediction_row(&self.pool, prediction).await
    }

    async fn insert_forecast_prediction(
        &self,
        forecast: &WeatherRecord,
        prediction: &Prediction,
    ) -> Result<(i64, i64)> {
        let mut tx = self.pool.begin().await?;
        let forecast_id = insert_weather_row(&mut *tx, WeatherSource::Forecast, forecast).await?;
        let prediction_id = insert_prediction_row(&mut *tx, prediction).await?;
        tx.commit().await?;
        Ok((forecast_id, prediction_id))
    }

    async fn latest_predictions(&self, n: usize) -> Result<Vec<Prediction>> {
        let rows = sqlx::query_as::<_, PredictionRow>(
            "SELECT date, visitors, visitors_class, classifier_id, regression_model_id
             FROM zoo_statistic_prediction ORDER BY date DESC, id DESC LIMIT $1",
        )
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Prediction::try_from).collect()
    }

    async fn predictions_with_actuals(&self) -> Result<Vec<(Prediction, Option<VisitorRecord>)>> {
        // DISTINCT ON keeps one actual per date if a day was recorded twice
        let rows = sqlx::query_as::<_, EvaluationRow>(
            "SELECT p.date, p.visitors, p.visitors_class, p.classifier_id, p.regression_model_id,
                    a.visitors AS actual_visitors, a.visitors_class AS actual_class
             FROM zoo_statistic_prediction p
             LEFT OUTER JOIN (
                 SELECT DISTINCT ON (date) date, visitors, visitors_class
                 FROM zoo_statistic ORDER BY date, id DESC
             ) a ON a.date = p.date
             ORDER BY p.date DESC, p.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let date = row.prediction.date;
                let actual = match (row.actual_visitors, row.actual_class) {
                    (Some(visitors), Some(class)) => Some(VisitorRecord::try_from(VisitorRow {
                        date,
                        visitors,
                        visitors_class: class,
                    })?),
                    _ => None,
                };
                Ok((Prediction::try_from(row.prediction)?, actual))
            })
            .collect()
    }

    async fn insert_model(&self, model: &PersistedModel) -> Result<i64> {
        insert_model_row(&self.pool, model).await
    }

    async fn latest_model(&self, kind: ModelKind) -> Result<Option<StoredModel>> {
        let sql = match kind {
            ModelKind::Classifier => {
                "SELECT id, name, trained_at, model FROM classifier
                 ORDER BY trained_at DESC, id DESC LIMIT 1"
            }
            ModelKind::Regressor => {
                "SELECT id, name, trained_at, model FROM regression_model
                 ORDER BY trained_at DESC, id DESC LIMIT 1"
            }
        };

        let row = sqlx::query_as::<_, ModelRow>(sql)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| StoredModel {
            id: row.id,
            kind,
            name: row.name,
            trained_at: row.trained_at,
            blob: row.model,
        }))
    }

    async fn replace_models(
        &self,
        classifier: &PersistedModel,
        regressor: &PersistedModel,
        keep_existing: bool,
    ) -> Result<(i64, i64)> {
        let mut tx = self.pool.begin().await?;
        let classifier_id = insert_model_row(&mut *tx, classifier).await?;
        let regressor_id = insert_model_row(&mut *tx, regressor).await?;
        if !keep_existing {
            for (kind, keep) in [
                (ModelKind::Classifier, classifier_id),
                (ModelKind::Regressor, regressor_id),
            ] {
                let removed = delete_models_except(&mut *tx, kind, keep).await?;
                tracing::info!("Deleted {} older {} models", removed, kind);
            }
        }
        tx.commit().await?;
        Ok((classifier_id, regressor_id))
    }
}
