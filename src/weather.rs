//! Daily weather records and their CSV representation.

use std::io::{Read, Write};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::Result;

/// Where a weather record came from. Observations and forecasts are stored in
/// separate tables but share the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherSource {
    Observation,
    Forecast,
}

impl WeatherSource {
    pub fn table(&self) -> &'static str {
        match self {
            WeatherSource::Observation => "weather_observation",
            WeatherSource::Forecast => "weather_forecast",
        }
    }
}

/// Weather statistics for a single calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WeatherRecord {
    pub date: NaiveDate,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_mean: Option<f64>,
    pub precipitation: Option<f64>,
    pub snow_depth: Option<f64>,
}

impl WeatherRecord {
    /// An empty record for `date`; fields are filled in as measurements arrive.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            temp_max: None,
            temp_min: None,
            temp_mean: None,
            precipitation: None,
            snow_depth: None,
        }
    }

    /// Monday-first weekday index (0 = Monday, 6 = Sunday).
    pub fn weekday_index(&self) -> usize {
        self.date.weekday().num_days_from_monday() as usize
    }

    /// Copy of this record with negative precipitation set to zero.
    ///
    /// FMI reports -1.0 for days without measurable rain.
    pub fn cleaned(&self) -> Self {
        let mut record = self.clone();
        record.precipitation = self.precipitation.map(clamp_precipitation);
        record
    }
}

pub fn clamp_precipitation(value: f64) -> f64 {
    if value < 0.0 { 0.0 } else { value }
}

#[derive(Debug, Deserialize)]
struct WeatherCsvRow {
    #[serde(alias = "datetime")]
    date: NaiveDate,
    precipitation: Option<f64>,
    temp_mean: Option<f64>,
    #[serde(default)]
    snow_depth: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
}

impl From<WeatherCsvRow> for WeatherRecord {
    fn from(row: WeatherCsvRow) -> Self {
        Self {
            date: row.date,
            temp_max: row.temp_max,
            temp_min: row.temp_min,
            temp_mean: row.temp_mean,
            precipitation: row.precipitation,
            snow_depth: row.snow_depth,
        }
    }
}

/// Write records as CSV, sorted ascending by date.
///
/// The `snow_depth` column is only present when at least one record has a
/// snow depth value.
pub fn write_csv<W: Write>(records: &[WeatherRecord], out: W) -> Result<()> {
    let mut sorted: Vec<&WeatherRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.date);

    let with_snow = records.iter().any(|r| r.snow_depth.is_some());

    let mut wtr = csv::Writer::from_writer(out);
    let mut header = vec!["date", "precipitation", "temp_mean"];
    if with_snow {
        header.push("snow_depth");
    }
    header.extend(["temp_min", "temp_max"]);
    wtr.write_record(&header)?;

    for record in sorted {
        let mut row = vec![
            record.date.format("%Y-%m-%d").to_string(),
            fmt_opt(record.precipitation),
            fmt_opt(record.temp_mean),
        ];
        if with_snow {
            row.push(fmt_opt(record.snow_depth));
        }
        row.push(fmt_opt(record.temp_min));
        row.push(fmt_opt(record.temp_max));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Read records from CSV written by [`write_csv`] (or the historical
/// training files, which name the date column `datetime`).
pub fn read_csv<R: Read>(input: R) -> Result<Vec<WeatherRecord>> {
    let mut rdr = csv::Reader::from_reader(input);
    let mut records = Vec::new();
    for row in rdr.deserialize::<WeatherCsvRow>() {
        records.push(row?.into());
    }
    Ok(records)
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
