//! Batch jobs run by the scheduler: next-day forecast scoring, observation
//! harvesting and recording actual visitor counts.

use std::ops::RangeInclusive;

use chrono::{Duration, Months, NaiveDate};

use crate::api::FmiClient;
use crate::error::{Result, ZooError};
use crate::ml::{ModelKind, Prediction, VisitorPredictor};
use crate::traits::{Clock, Store};
use crate::visitors::{ClassThresholds, VisitorRecord};
use crate::weather::{WeatherRecord, WeatherSource};

/// What a forecast harvest stored.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub date: NaiveDate,
    pub forecast: WeatherRecord,
    pub prediction: Prediction,
    pub forecast_id: i64,
    pub prediction_id: i64,
}

/// Build a predictor from the most recently stored classifier and regressor.
pub async fn load_predictor<S: Store>(store: &S) -> Result<VisitorPredictor> {
    let classifier = store
        .latest_model(ModelKind::Classifier)
        .await?
        .ok_or_else(|| ZooError::Model("no classifier stored; run `train --store` first".to_string()))?;
    let regressor = store
        .latest_model(ModelKind::Regressor)
        .await?
        .ok_or_else(|| ZooError::Model("no regressor stored; run `train --store` first".to_string()))?;

    tracing::debug!(
        "Using classifier {} ({:?}) and regressor {} ({:?})",
        classifier.id,
        classifier.name,
        regressor.id,
        regressor.name
    );

    let predictor = VisitorPredictor::from_persisted(classifier.decode()?, regressor.decode()?)?;
    Ok(predictor.with_model_ids(classifier.id, regressor.id))
}

/// Fetch tomorrow's forecast, score it, and store both.
///
/// Nothing is written unless the fetch, the parse and the prediction all
/// succeed. Running twice for the same day stores a second prediction.
pub async fn harvest_forecast<S: Store, C: Clock>(
    client: &FmiClient,
    store: &S,
    clock: &C,
    location: &str,
) -> Result<HarvestOutcome> {
    let date = clock.today() + Duration::days(1);
    tracing::info!("Fetching FMI weather forecast data for {}", date);

    let forecast = client
        .fetch_forecast(location, date, date)
        .await?
        .into_iter()
        .find(|r| r.date == date)
        .ok_or(ZooError::NotFound(date))?;
    tracing::debug!("Got forecast: {:?}", forecast);

    let predictor = load_predictor(store).await?;
    let prediction = predictor.predict(&forecast)?;

    if let Some(previous) = store.latest_predictions(1).await?.first() {
        if previous.date == date {
            tracing::warn!("A prediction for {} already exists; storing another", date);
        }
    }

    let (forecast_id, prediction_id) = store
        .insert_forecast_prediction(&forecast, &prediction)
        .await?;
    tracing::info!(
        "Predicted {:.0} visitors (class {}) for {}",
        prediction.predicted_visitor_count,
        prediction.predicted_visitor_class,
        date
    );

    Ok(HarvestOutcome {
        date,
        forecast,
        prediction,
        forecast_id,
        prediction_id,
    })
}

/// Fetch daily observations for `place` and optionally store them.
pub async fn harvest_observations<S: Store>(
    client: &FmiClient,
    store: Option<&S>,
    place: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<WeatherRecord>> {
    tracing::info!("Fetching FMI observations for {} from {} to {}", place, start, end);
    let records = client.fetch_observations(place, start, end).await?;

    if let Some(store) = store {
        for record in &records {
            store.insert_weather(WeatherSource::Observation, record).await?;
        }
        tracing::info!("Stored {} observation days", records.len());
    }

    Ok(records)
}

/// The same calendar window in each of `years`, from the first day of the
/// first month to the last day of the last month.
pub fn seasonal_windows(
    years: RangeInclusive<i32>,
    months: RangeInclusive<u32>,
) -> Result<Vec<(NaiveDate, NaiveDate)>> {
    let (first_month, last_month) = (*months.start(), *months.end());
    if !(1..=12).contains(&first_month) || !(1..=12).contains(&last_month) || first_month > last_month
    {
        return Err(ZooError::Config(format!(
            "invalid month range {}..={}",
            first_month, last_month
        )));
    }

    years
        .map(|year| {
            let start = NaiveDate::from_ymd_opt(year, first_month, 1);
            let end = NaiveDate::from_ymd_opt(year, last_month, 1)
                .and_then(|d| d.checked_add_months(Months::new(1)))
                .and_then(|d| d.pred_opt());
            start
                .zip(end)
                .ok_or_else(|| ZooError::Config(format!("year {} out of range", year)))
        })
        .collect()
}

/// Fetch the same seasonal window of observations for every year, e.g.
/// January to March of 2010 through 2016, and merge them oldest first.
pub async fn harvest_observation_history<S: Store>(
    client: &FmiClient,
    store: Option<&S>,
    place: &str,
    years: RangeInclusive<i32>,
    months: RangeInclusive<u32>,
) -> Result<Vec<WeatherRecord>> {
    let windows = seasonal_windows(years, months)?;
    if windows.is_empty() {
        return Err(ZooError::Config("empty year range".to_string()));
    }

    let mut records = Vec::new();
    for (start, end) in windows {
        records.extend(harvest_observations(client, store, place, start, end).await?);
    }
    records.sort_by_key(|r| r.date);
    tracing::info!("Collected {} observation days", records.len());
    Ok(records)
}

/// Store the actual visitor count for `date`, classed with `classes`.
pub async fn record_actual<S: Store>(
    store: &S,
    classes: &ClassThresholds,
    date: NaiveDate,
    visitor_count: u32,
) -> Result<VisitorRecord> {
    let record = VisitorRecord::new(date, visitor_count, classes);
    if store.actual_on(date).await?.is_some() {
        tracing::warn!("Visitor count for {} already recorded; storing another", date);
    }
    store.insert_actual(&record).await?;
    tracing::info!(
        "Recorded {} visitors (class {}) for {}",
        record.visitor_count,
        record.visitor_class(),
        date
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_visitor_classes;
    use crate::traits::MemoryStore;

    #[tokio::test]
    async fn test_load_predictor_without_models() {
        let store = MemoryStore::new();
        let result = load_predictor(&store).await;
        assert!(matches!(result, Err(ZooError::Model(msg)) if msg.contains("classifier")));
    }

    #[test]
    fn test_seasonal_windows_cover_whole_months() {
        let windows = seasonal_windows(2015..=2016, 1..=3).unwrap();
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(
            windows,
            vec![
                (day(2015, 1, 1), day(2015, 3, 31)),
                (day(2016, 1, 1), day(2016, 3, 31)),
            ]
        );
    }

    #[test]
    fn test_seasonal_windows_leap_february() {
        let windows = seasonal_windows(2016..=2016, 2..=2).unwrap();
        assert_eq!(windows[0].1, NaiveDate::from_ymd_opt(2016, 2, 29).unwrap());

        let windows = seasonal_windows(2017..=2017, 12..=12).unwrap();
        assert_eq!(windows[0].1, NaiveDate::from_ymd_opt(2017, 12, 31).unwrap());
    }

    #[test]
    fn test_seasonal_windows_rejects_bad_months() {
        assert!(matches!(seasonal_windows(2010..=2016, 3..=1), Err(ZooError::Config(_))));
        assert!(matches!(seasonal_windows(2010..=2016, 0..=3), Err(ZooError::Config(_))));
        assert!(matches!(seasonal_windows(2010..=2016, 1..=13), Err(ZooError::Config(_))));
    }

    #[tokio::test]
    async fn test_record_actual_derives_class() {
        let store = MemoryStore::new();
        let classes = ClassThresholds::from_config(&default_visitor_classes()).unwrap();
        let date = NaiveDate::from_ymd_opt(2017, 3, 1).unwrap();

        let record = record_actual(&store, &classes, date, 3000).await.unwrap();

        assert_eq!(record.visitor_class(), 2);
        assert_eq!(store.actual_on(date).await.unwrap(), Some(record));
    }
}
