use std::time::Duration;

use chrono::NaiveDate;

use crate::config::NetworkConfig;
use crate::error::{Result, ZooError};
use crate::parser::{ForecastParser, ObservationParser};
use crate::weather::WeatherRecord;

const FORECAST_QUERY: &str = "fmi::forecast::hirlam::surface::cities::simple";
const OBSERVATION_QUERY: &str = "fmi::observations::weather::daily::simple";

/// Client for the FMI open data WFS service.
#[derive(Clone, Debug)]
pub struct FmiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FmiClient {
    /// Create a new API client with configurable timeouts.
    ///
    /// Requests go to `{base_url}/{api_key}/wfs`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        network_config: &NetworkConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network_config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network_config.connect_timeout_secs))
            .build()
            .map_err(|e| ZooError::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn wfs_url(&self) -> String {
        format!("{}/{}/wfs", self.base_url, self.api_key)
    }

    /// Run a stored query and return the raw XML body.
    pub async fn get_feature(&self, params: &[(&str, String)]) -> Result<String> {
        let mut query: Vec<(&str, &str)> = vec![("request", "getFeature")];
        query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let url = reqwest::Url::parse_with_params(&self.wfs_url(), &query)
            .map_err(|e| ZooError::Fetch(format!("Invalid FMI URL: {}", e)))?;

        // The URL carries the API key, so only the query is logged
        tracing::debug!("Requesting FMI stored query {:?}", params);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ZooError::Fetch(format!("Failed to send request to FMI: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ZooError::Fetch(format!(
                "Fetching data failed with status code {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ZooError::Fetch(format!("Failed to read FMI response: {}", e)))?;
        if body.is_empty() {
            return Err(ZooError::Fetch(
                "Got empty response to data request".to_string(),
            ));
        }

        Ok(body)
    }

    /// Hourly forecasts from `start` 00:00 to `end` 23:59, aggregated into one
    /// record per day for the points matching `location`.
    pub async fn fetch_forecast(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherRecord>> {
        let xml = self
            .get_feature(&[
                ("storedquery_id", FORECAST_QUERY.to_string()),
                ("timestep", "60".to_string()),
                ("starttime", format!("{}T00:00:00", start)),
                ("endtime", format!("{}T23:59:00", end)),
            ])
            .await?;

        let mut parser = ForecastParser::new();
        parser.parse(&xml, location)?;
        Ok(parser.records())
    }

    /// Daily observations for a named station, `start` to `end` inclusive.
    pub async fn fetch_observations(
        &self,
        place: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<WeatherRecord>> {
        let xml = self
            .get_feature(&[
                ("storedquery_id", OBSERVATION_QUERY.to_string()),
                ("place", place.to_string()),
                ("timestep", "1440".to_string()),
                ("starttime", start.to_string()),
                ("endtime", end.to_string()),
            ])
            .await?;

        let mut parser = ObservationParser::new();
        parser.parse(&xml)?;
        Ok(parser.records())
    }
}
