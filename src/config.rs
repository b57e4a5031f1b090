use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::visitors::ClassThresholds;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub fmi: FmiConfig,
    pub network: NetworkConfig,
    pub model: ModelConfig,
    #[serde(default = "default_visitor_classes")]
    pub visitor_classes: Vec<VisitorClassConfig>,
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    /// Only required by commands that read or write the database.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FmiConfig {
    /// Base URL; the API key and `/wfs` are appended.
    pub api_url: String,
    /// Observation station name, e.g. "kaisaniemi".
    pub observation_place: String,
    /// Forecast point as it appears in `gml:pos` ("lat lon").
    pub forecast_location: String,
    pub api_key: Option<String>,
    pub api_key_path: PathBuf,
}

impl Default for FmiConfig {
    fn default() -> Self {
        Self {
            api_url: "http://data.fmi.fi/fmi-apikey".to_string(),
            observation_place: "kaisaniemi".to_string(),
            forecast_location: "60.16952 24.93545".to_string(),
            api_key: None,
            api_key_path: PathBuf::from("fmi_api_key.txt"),
        }
    }
}

impl FmiConfig {
    /// `FMI_API_KEY` from the environment, then `fmi.api_key`, then the
    /// contents of `fmi.api_key_path`.
    pub fn resolve_api_key(&self) -> Result<String> {
        tracing::debug!("Checking for API key in $FMI_API_KEY");
        if let Ok(key) = std::env::var("FMI_API_KEY") {
            if !key.trim().is_empty() {
                return Ok(key.trim().to_string());
            }
        }
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.trim().to_string());
        }

        tracing::debug!("Reading API key from {}", self.api_key_path.display());
        let key = std::fs::read_to_string(&self.api_key_path).with_context(|| {
            format!(
                "FMI API key not set and {} is not readable",
                self.api_key_path.display()
            )
        })?;
        Ok(key.trim().to_string())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Cross-validation folds; 0 skips estimation.
    pub cv_folds: usize,
    /// L2 penalty added to the least-squares regressor.
    pub ridge_penalty: f64,
    /// L2 penalty of the logistic classifier.
    pub classifier_alpha: f64,
    pub max_iterations: u64,
    pub classifier_path: PathBuf,
    pub regressor_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cv_folds: 10,
            ridge_penalty: 1e-3,
            classifier_alpha: 1.0,
            max_iterations: 100,
            classifier_path: PathBuf::from("classifier.bin"),
            regressor_path: PathBuf::from("regression_model.bin"),
        }
    }
}

/// One `[[visitor_classes]]` entry.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VisitorClassConfig {
    pub label: u32,
    pub min: i64,
    pub display_label: String,
}

pub fn default_visitor_classes() -> Vec<VisitorClassConfig> {
    vec![
        VisitorClassConfig {
            label: 0,
            min: 0,
            display_label: "Quiet".to_string(),
        },
        VisitorClassConfig {
            label: 1,
            min: 1000,
            display_label: "Normal".to_string(),
        },
        VisitorClassConfig {
            label: 2,
            min: 3000,
            display_label: "Busy".to_string(),
        },
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    /// How many prediction rows the `evaluate` command prints.
    pub display_limit: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { display_limit: 30 }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present - production uses env vars directly)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zoo-predict");

        let builder = Config::builder()
            // 1. Defaults
            .set_default("database.url", std::env::var("DATABASE_URL").ok())?
            // FMI
            .set_default("fmi.api_url", "http://data.fmi.fi/fmi-apikey")?
            .set_default("fmi.observation_place", "kaisaniemi")?
            .set_default("fmi.forecast_location", "60.16952 24.93545")?
            .set_default("fmi.api_key", None::<String>)?
            .set_default("fmi.api_key_path", "fmi_api_key.txt")?
            // Network
            .set_default("network.request_timeout_secs", 30)?
            .set_default("network.connect_timeout_secs", 10)?
            // Model
            .set_default("model.cv_folds", 10)?
            .set_default("model.ridge_penalty", 1e-3)?
            .set_default("model.classifier_alpha", 1.0)?
            .set_default("model.max_iterations", 100)?
            .set_default("model.classifier_path", "classifier.bin")?
            .set_default("model.regressor_path", "regression_model.bin")?
            // Evaluation
            .set_default("evaluation.display_limit", 30)?

            // 2. Local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))

            // 3. User config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))

            // 4. Environment variables (ZOOPREDICT__MODEL__CV_FOLDS=...)
            .add_source(Environment::with_prefix("ZOOPREDICT").separator("__"));

        let s = builder.build()?;
        let config: AppConfig = s.try_deserialize()?;

        // Reject bad class thresholds before any job runs.
        config
            .class_thresholds()
            .context("Invalid visitor class configuration")?;

        Ok(config)
    }

    pub fn class_thresholds(&self) -> crate::error::Result<ClassThresholds> {
        ClassThresholds::from_config(&self.visitor_classes)
    }
}
