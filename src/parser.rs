//! Parsers for FMI WFS "simple" feature collections.
//!
//! Each `wfs:member/BsWfs:BsWfsElement` carries one scalar measurement for a
//! location and timestamp. Measurements are grouped into one
//! [`WeatherRecord`] per calendar day.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use roxmltree::{Document, Node};

use crate::error::{Result, ZooError};
use crate::weather::WeatherRecord;

const WFS_NS: &str = "http://www.opengis.net/wfs/2.0";
const GML_NS: &str = "http://www.opengis.net/gml/3.2";
const BSWFS_NS: &str = "http://xml.fmi.fi/schema/wfs/2.0";

const FMI_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A single measurement extracted from a `BsWfsElement`.
#[derive(Debug, Clone, PartialEq)]
struct Measurement {
    location: Option<String>,
    date: NaiveDate,
    parameter: String,
    value: Option<f64>,
}

/// Parses daily observations (`fmi::observations::weather::daily::simple`).
#[derive(Debug, Default)]
pub struct ObservationParser {
    observations: BTreeMap<NaiveDate, WeatherRecord>,
}

impl ObservationParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document, merging its measurements into the records seen so
    /// far. On error nothing from this document is kept.
    pub fn parse(&mut self, xml: &str) -> Result<()> {
        let measurements = read_measurements(xml)?;
        for m in measurements {
            let record = self
                .observations
                .entry(m.date)
                .or_insert_with(|| WeatherRecord::new(m.date));
            match m.parameter.as_str() {
                "rrday" => record.precipitation = m.value,
                "tday" => record.temp_mean = m.value,
                "tmax" => record.temp_max = m.value,
                "tmin" => record.temp_min = m.value,
                "snow" => record.snow_depth = m.value,
                other => tracing::trace!("Ignoring observation parameter {}", other),
            }
        }
        tracing::debug!("Parsed observations for {} days", self.observations.len());
        Ok(())
    }

    pub fn record_for(&self, date: NaiveDate) -> Result<&WeatherRecord> {
        self.observations.get(&date).ok_or(ZooError::NotFound(date))
    }

    /// All parsed records, ascending by date.
    pub fn records(&self) -> Vec<WeatherRecord> {
        self.observations.values().cloned().collect()
    }
}

/// Running values for one forecast day.
#[derive(Debug, Clone)]
struct ForecastDay {
    temp_max: Option<f64>,
    temp_min: Option<f64>,
    precipitation: f64,
    temperatures: Vec<f64>,
}

impl ForecastDay {
    fn new() -> Self {
        Self {
            temp_max: None,
            temp_min: None,
            precipitation: 0.0,
            temperatures: Vec::new(),
        }
    }

    fn track_max(&mut self, value: f64) {
        self.temp_max = Some(self.temp_max.map_or(value, |m| m.max(value)));
    }

    fn track_min(&mut self, value: f64) {
        self.temp_min = Some(self.temp_min.map_or(value, |m| m.min(value)));
    }

    fn finish(self, date: NaiveDate) -> WeatherRecord {
        let temp_mean = if self.temperatures.is_empty() {
            None
        } else {
            Some(self.temperatures.iter().sum::<f64>() / self.temperatures.len() as f64)
        };
        WeatherRecord {
            date,
            temp_max: self.temp_max,
            temp_min: self.temp_min,
            temp_mean,
            precipitation: Some(self.precipitation),
            snow_depth: None,
        }
    }
}

/// Parses hourly forecasts (`fmi::forecast::hirlam::surface::cities::simple`)
/// into daily records for a single location.
#[derive(Debug, Default)]
pub struct ForecastParser {
    forecasts: BTreeMap<NaiveDate, WeatherRecord>,
}

impl ForecastParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document, keeping only points at `location` (a `"lat lon"`
    /// pair as it appears in `gml:pos`).
    ///
    /// Hourly `Precipitation1h` values are summed per day. `Temperature`
    /// readings feed the daily maximum, minimum and mean; `tmax`/`tmin`
    /// points only feed the maximum or minimum.
    pub fn parse(&mut self, xml: &str, location: &str) -> Result<()> {
        let location = location.trim();
        let measurements = read_measurements(xml)?;

        let mut days: BTreeMap<NaiveDate, ForecastDay> = BTreeMap::new();
        for m in measurements {
            if m.location.as_deref() != Some(location) {
                continue;
            }
            let day = days.entry(m.date).or_insert_with(|| {
                tracing::debug!("Found forecast for new date: {}", m.date);
                ForecastDay::new()
            });
            let Some(value) = m.value else {
                continue;
            };
            match m.parameter.as_str() {
                "Precipitation1h" => day.precipitation += value,
                "Temperature" => {
                    day.track_max(value);
                    day.track_min(value);
                    day.temperatures.push(value);
                }
                "tmax" => day.track_max(value),
                "tmin" => day.track_min(value),
                other => tracing::trace!("Ignoring forecast parameter {}", other),
            }
        }

        tracing::debug!("Found forecasts for {} days", days.len());
        for (date, day) in days {
            self.forecasts.insert(date, day.finish(date));
        }
        Ok(())
    }

    pub fn record_for(&self, date: NaiveDate) -> Result<&WeatherRecord> {
        self.forecasts.get(&date).ok_or(ZooError::NotFound(date))
    }

    /// All parsed records, ascending by date.
    pub fn records(&self) -> Vec<WeatherRecord> {
        self.forecasts.values().cloned().collect()
    }
}

/// Truncate an FMI timestamp to its calendar date.
pub fn parse_fmi_date(timestamp: &str) -> Result<NaiveDate> {
    NaiveDateTime::parse_from_str(timestamp.trim(), FMI_TIME_FORMAT)
        .map(|dt| dt.date())
        .map_err(|e| ZooError::Parse(format!("invalid timestamp {:?}: {}", timestamp, e)))
}

fn read_measurements(xml: &str) -> Result<Vec<Measurement>> {
    let doc = Document::parse(xml).map_err(|e| ZooError::Parse(e.to_string()))?;

    let root = doc.root_element();
    let mut measurements = Vec::new();

    for member in root.children().filter(|n| n.has_tag_name((WFS_NS, "member"))) {
        for element in member
            .children()
            .filter(|n| n.has_tag_name((BSWFS_NS, "BsWfsElement")))
        {
            measurements.push(read_element(element)?);
        }
    }

    Ok(measurements)
}

fn read_element(element: Node<'_, '_>) -> Result<Measurement> {
    let time = child_text(element, "Time")
        .ok_or_else(|| ZooError::Parse("BsWfsElement without Time".to_string()))?;
    let parameter = child_text(element, "ParameterName")
        .ok_or_else(|| ZooError::Parse("BsWfsElement without ParameterName".to_string()))?;
    let raw_value = child_text(element, "ParameterValue")
        .ok_or_else(|| ZooError::Parse("BsWfsElement without ParameterValue".to_string()))?;

    let location = element
        .children()
        .find(|n| n.has_tag_name((BSWFS_NS, "Location")))
        .and_then(|loc| loc.descendants().find(|n| n.has_tag_name((GML_NS, "pos"))))
        .and_then(|pos| pos.text())
        .map(|text| text.trim().to_string());

    Ok(Measurement {
        location,
        date: parse_fmi_date(time)?,
        parameter: parameter.trim().to_string(),
        value: parse_value(raw_value)?,
    })
}

fn child_text<'a>(element: Node<'a, '_>, name: &str) -> Option<&'a str> {
    element
        .children()
        .find(|n| n.has_tag_name((BSWFS_NS, name)))
        .and_then(|n| n.text())
}

/// FMI writes `NaN` for missing values.
fn parse_value(raw: &str) -> Result<Option<f64>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|e| ZooError::Parse(format!("invalid value {:?}: {}", raw, e)))
}
