//! Feature extraction for ML predictions
//!
//! Converts daily weather records into the numeric feature matrix the
//! visitor models are trained on and queried with.

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZooError};
use crate::weather::{WeatherRecord, clamp_precipitation};

/// Monday-first weekday names used in indicator column names.
pub const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Weather fields that can be used as predictors.
pub const WEATHER_FIELDS: [&str; 5] = [
    "temp_max",
    "temp_min",
    "temp_mean",
    "precipitation",
    "snow_depth",
];

const WEEKDAY_PREFIX: &str = "weekday_";

/// Name of the one-hot indicator column for a Monday-first weekday index.
pub fn weekday_column(index: usize) -> String {
    format!("{}{}", WEEKDAY_PREFIX, WEEKDAYS[index % 7])
}

/// Ordered list of feature column names a model is trained against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorSchema {
    columns: Vec<String>,
}

impl PredictorSchema {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Every column must be a weather field or a weekday indicator.
    pub fn validate(&self) -> Result<()> {
        if let Some(unknown) = self
            .columns
            .iter()
            .find(|c| !WEATHER_FIELDS.contains(&c.as_str()) && !is_weekday_column(c))
        {
            return Err(ZooError::Schema(format!(
                "unknown predictor column {:?}",
                unknown
            )));
        }
        Ok(())
    }
}

impl Default for PredictorSchema {
    /// `temp_max`, `precipitation` and the seven weekday indicators.
    fn default() -> Self {
        let mut columns = vec!["temp_max".to_string(), "precipitation".to_string()];
        columns.extend((0..7).map(weekday_column));
        Self { columns }
    }
}

/// Builds feature matrices aligned with a [`PredictorSchema`].
#[derive(Debug, Clone)]
pub struct FeatureVectorizer {
    schema: PredictorSchema,
}

impl FeatureVectorizer {
    pub fn new(schema: PredictorSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &PredictorSchema {
        &self.schema
    }

    /// Build an N×P matrix for `records`, with columns in schema order.
    ///
    /// Weekdays are one-hot encoded only for the weekdays present in
    /// `records`; the result is then reindexed against the schema so that
    /// indicator columns for absent weekdays are present and zero. Missing
    /// weather values become 0.0 and negative precipitation is clamped.
    pub fn vectorize(&self, records: &[WeatherRecord]) -> Result<Array2<f64>> {
        let generated = generate_columns(records);

        let mut matrix = Array2::<f64>::zeros((records.len(), self.schema.len()));
        for (j, name) in self.schema.columns.iter().enumerate() {
            match generated.get(name.as_str()) {
                Some(values) => {
                    for (i, v) in values.iter().enumerate() {
                        matrix[[i, j]] = *v;
                    }
                }
                None if is_weekday_column(name) => {
                    // Zero-filled by construction
                }
                None => {
                    return Err(ZooError::Schema(format!(
                        "unknown predictor column {:?}",
                        name
                    )));
                }
            }
        }

        Ok(matrix)
    }
}

/// Raw columns before reindexing: every weather field, plus one indicator
/// column per weekday that actually occurs.
fn generate_columns(records: &[WeatherRecord]) -> HashMap<String, Vec<f64>> {
    let n = records.len();
    let mut columns: HashMap<String, Vec<f64>> = HashMap::new();

    let field = |f: fn(&WeatherRecord) -> Option<f64>| -> Vec<f64> {
        records.iter().map(|r| f(r).unwrap_or(0.0)).collect()
    };
    columns.insert("temp_max".to_string(), field(|r| r.temp_max));
    columns.insert("temp_min".to_string(), field(|r| r.temp_min));
    columns.insert("temp_mean".to_string(), field(|r| r.temp_mean));
    columns.insert(
        "precipitation".to_string(),
        field(|r| r.precipitation.map(clamp_precipitation)),
    );
    columns.insert("snow_depth".to_string(), field(|r| r.snow_depth));

    for (i, record) in records.iter().enumerate() {
        columns
            .entry(weekday_column(record.weekday_index()))
            .or_insert_with(|| vec![0.0; n])[i] = 1.0;
    }

    columns
}

fn is_weekday_column(name: &str) -> bool {
    name.strip_prefix(WEEKDAY_PREFIX)
        .is_some_and(|day| WEEKDAYS.contains(&day))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn record(date: NaiveDate, temp_max: f64, precipitation: f64) -> WeatherRecord {
        WeatherRecord {
            date,
            temp_max: Some(temp_max),
            temp_min: Some(temp_max - 5.0),
            temp_mean: Some(temp_max - 2.5),
            precipitation: Some(precipitation),
            snow_depth: None,
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 3, 6).unwrap()
    }

    #[test]
    fn test_validate_rejects_unknown_column() {
        assert!(PredictorSchema::default().validate().is_ok());
        assert!(PredictorSchema::new(["temp_mean", "snow_depth", "weekday_Sat"]).validate().is_ok());

        let bad = PredictorSchema::new(["temp_max", "weekday_Funday"]);
        assert!(matches!(bad.validate(), Err(ZooError::Schema(msg)) if msg.contains("weekday_Funday")));
    }

    #[test]
    fn test_default_schema_layout() {
        let schema = PredictorSchema::default();
        assert_eq!(schema.len(), 9);
        assert_eq!(schema.columns()[0], "temp_max");
        assert_eq!(schema.columns()[1], "precipitation");
        assert_eq!(schema.columns()[2], "weekday_Mon");
        assert_eq!(schema.columns()[8], "weekday_Sun");
    }

    #[test]
    fn test_single_record_is_reindexed_to_full_schema() {
        // 2017-03-08 is a Wednesday
        let wednesday = monday() + Duration::days(2);
        let vectorizer = FeatureVectorizer::new(PredictorSchema::default());

        let m = vectorizer.vectorize(&[record(wednesday, 2.13, 0.1)]).unwrap();

        assert_eq!(m.shape(), &[1, 9]);
        assert_eq!(m[[0, 0]], 2.13);
        assert_eq!(m[[0, 1]], 0.1);
        let weekdays: Vec<f64> = (2..9).map(|j| m[[0, j]]).collect();
        assert_eq!(weekdays, vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_weekday_indicators_sum_to_one() {
        let records: Vec<_> = (0..10)
            .map(|i| record(monday() + Duration::days(i), i as f64, 0.0))
            .collect();
        let vectorizer = FeatureVectorizer::new(PredictorSchema::default());

        let m = vectorizer.vectorize(&records).unwrap();

        for row in m.rows() {
            let sum: f64 = row.iter().skip(2).sum();
            assert_eq!(sum, 1.0);
        }
    }

    #[test]
    fn test_partial_schema_keeps_order() {
        let schema = PredictorSchema::new(["weekday_Sun", "precipitation", "weekday_Mon"]);
        let vectorizer = FeatureVectorizer::new(schema);

        let m = vectorizer.vectorize(&[record(monday(), 1.0, 0.7)]).unwrap();

        assert_eq!(m.row(0).to_vec(), vec![0.0, 0.7, 1.0]);
    }

    #[test]
    fn test_negative_precipitation_is_clamped() {
        let vectorizer = FeatureVectorizer::new(PredictorSchema::default());
        let m = vectorizer.vectorize(&[record(monday(), 1.0, -1.0)]).unwrap();
        assert_eq!(m[[0, 1]], 0.0);
    }

    #[test]
    fn test_missing_values_become_zero() {
        let vectorizer = FeatureVectorizer::new(PredictorSchema::new(["temp_max", "snow_depth"]));
        let m = vectorizer.vectorize(&[WeatherRecord::new(monday())]).unwrap();
        assert_eq!(m.row(0).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_unknown_column_is_schema_error() {
        let vectorizer = FeatureVectorizer::new(PredictorSchema::new(["temp_max", "humidity"]));
        let result = vectorizer.vectorize(&[record(monday(), 1.0, 0.0)]);
        assert!(matches!(result, Err(ZooError::Schema(msg)) if msg.contains("humidity")));
    }

    #[test]
    fn test_misspelled_weekday_is_schema_error() {
        let vectorizer = FeatureVectorizer::new(PredictorSchema::new(["weekday_Monday"]));
        let result = vectorizer.vectorize(&[record(monday(), 1.0, 0.0)]);
        assert!(matches!(result, Err(ZooError::Schema(_))));
    }

    #[test]
    fn test_empty_input_gives_empty_matrix() {
        let vectorizer = FeatureVectorizer::new(PredictorSchema::default());
        let m = vectorizer.vectorize(&[]).unwrap();
        assert_eq!(m.shape(), &[0, 9]);
    }

    #[test]
    fn test_all_weather_fields_are_known() {
        let vectorizer = FeatureVectorizer::new(PredictorSchema::new(WEATHER_FIELDS));
        let m = vectorizer.vectorize(&[record(monday(), 4.0, 1.0)]).unwrap();
        assert_eq!(m.row(0).to_vec(), vec![4.0, -1.0, 1.5, 1.0, 0.0]);
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn every_row_has_exactly_one_weekday(offsets in proptest::collection::vec(0i64..3650, 1..40)) {
                let records: Vec<_> = offsets
                    .iter()
                    .map(|d| record(monday() + Duration::days(*d), 0.0, 0.0))
                    .collect();
                let m = FeatureVectorizer::new(PredictorSchema::default())
                    .vectorize(&records)
                    .unwrap();
                for row in m.rows() {
                    let sum: f64 = row.iter().skip(2).sum();
                    prop_assert_eq!(sum, 1.0);
                }
            }

            #[test]
            fn precipitation_feature_is_never_negative(p in -10.0f64..10.0) {
                let m = FeatureVectorizer::new(PredictorSchema::default())
                    .vectorize(&[record(monday(), 0.0, p)])
                    .unwrap();
                prop_assert!(m[[0, 1]] >= 0.0);
            }
        }
    }
}
