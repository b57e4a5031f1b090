use std::fs::File;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use zoo_predict::{
    api::FmiClient,
    config::AppConfig,
    db::Database,
    evaluation::{self, EvaluationReport},
    harvest,
    ml::{ModelBuilder, PersistedModel, TrainingOptions, TrainingReport, VisitorPredictor},
    traits::{Store, SystemClock},
    visitors::{self, VisitorRecord},
    weather::{self, WeatherRecord, WeatherSource},
};

#[derive(Parser, Debug)]
#[command(name = "zoo-predict")]
#[command(about = "Next-day zoo visitor predictions from FMI weather forecasts")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch tomorrow's forecast, predict visitors and store both
    Harvest,

    /// Fetch daily weather observations
    Observe {
        #[arg(long, required_unless_present = "history")]
        start: Option<NaiveDate>,
        #[arg(long, required_unless_present = "history")]
        end: Option<NaiveDate>,
        /// Fetch the same months of every year in --first-year..=--last-year
        #[arg(long, conflicts_with_all = ["start", "end"])]
        history: bool,
        #[arg(long, default_value_t = 2010)]
        first_year: i32,
        #[arg(long, default_value_t = 2016)]
        last_year: i32,
        #[arg(long, default_value_t = 1)]
        first_month: u32,
        #[arg(long, default_value_t = 3)]
        last_month: u32,
        /// Write the observations as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Store the observations in the database
        #[arg(long)]
        store: bool,
    },

    /// Train the classifier and regressor from historical CSV files
    Train {
        #[arg(short, long, default_value = "data/weather_observations_jan-mar_2010-2016.csv")]
        weather: PathBuf,
        #[arg(short, long, default_value = "data/oldVisitorCounts.csv")]
        visitors: PathBuf,
        /// Train from stored observations and visitor counts instead of CSV
        #[arg(long, conflicts_with_all = ["weather", "visitors"])]
        from_database: bool,
        /// Cross-validation folds (0 skips); defaults to model.cv_folds
        #[arg(long)]
        folds: Option<usize>,
        /// Store the models in the database instead of files
        #[arg(short = 'd', long = "store")]
        store: bool,
        /// Keep previously stored models instead of deleting them
        #[arg(long, requires = "store")]
        keep_existing: bool,
    },

    /// Predict visitors for each day of a weather CSV using the model files
    Predict {
        #[arg(short, long)]
        weather: PathBuf,
    },

    /// Export stored weather records as CSV
    Export {
        #[arg(long, value_enum, default_value_t = SourceArg::Observation)]
        source: SourceArg,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record the actual visitor count for a day
    RecordActual {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        visitors: u32,
    },

    /// Compare stored predictions with actual visitor counts
    Evaluate {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    Observation,
    Forecast,
}

impl From<SourceArg> for WeatherSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Observation => WeatherSource::Observation,
            SourceArg::Forecast => WeatherSource::Forecast,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("zoo_predict=debug");

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    let result = match args.command {
        Command::Harvest => rt.block_on(run_harvest(&config)),
        Command::Observe {
            start,
            end,
            history,
            first_year,
            last_year,
            first_month,
            last_month,
            output,
            store,
        } => {
            let range = match (start, end) {
                (Some(start), Some(end)) if !history => ObservationRange::Dates { start, end },
                _ => ObservationRange::History {
                    years: first_year..=last_year,
                    months: first_month..=last_month,
                },
            };
            rt.block_on(run_observe(&config, range, output, store))
        }
        Command::Train {
            weather,
            visitors,
            from_database,
            folds,
            store,
            keep_existing,
        } => {
            let data = if from_database {
                TrainingData::Database
            } else {
                TrainingData::Csv { weather, visitors }
            };
            rt.block_on(run_train(&config, data, folds, store, keep_existing))
        }
        Command::Predict { weather } => run_predict(&config, weather),
        Command::Export {
            source,
            start,
            end,
            output,
        } => rt.block_on(run_export(&config, source.into(), start, end, output)),
        Command::RecordActual { date, visitors } => {
            rt.block_on(run_record_actual(&config, date, visitors))
        }
        Command::Evaluate { json } => rt.block_on(run_evaluate(&config, json)),
    };

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

async fn connect(config: &AppConfig) -> Result<Database> {
    let url = config
        .database
        .url
        .as_deref()
        .context("No database configured; set DATABASE_URL or database.url")?;

    tracing::info!("Connecting to database...");
    let database = Database::new(url).await?;
    tracing::info!("Database connected successfully");
    Ok(database)
}

fn fmi_client(config: &AppConfig) -> Result<FmiClient> {
    let api_key = config.fmi.resolve_api_key()?;
    Ok(FmiClient::new(
        config.fmi.api_url.clone(),
        api_key,
        &config.network,
    )?)
}

async fn run_harvest(config: &AppConfig) -> Result<()> {
    tracing::info!("Running data harvester");
    let database = connect(config).await?;
    let client = fmi_client(config)?;

    let outcome = harvest::harvest_forecast(
        &client,
        &database,
        &SystemClock,
        &config.fmi.forecast_location,
    )
    .await
    .context("Forecast harvest failed")?;

    println!(
        "{}: {:.0} visitors, class {}",
        outcome.date,
        outcome.prediction.predicted_visitor_count,
        outcome.prediction.predicted_visitor_class
    );
    Ok(())
}

enum ObservationRange {
    Dates { start: NaiveDate, end: NaiveDate },
    History { years: RangeInclusive<i32>, months: RangeInclusive<u32> },
}

async fn run_observe(
    config: &AppConfig,
    range: ObservationRange,
    output: Option<PathBuf>,
    store: bool,
) -> Result<()> {
    if let ObservationRange::Dates { start, end } = &range {
        anyhow::ensure!(start <= end, "--start {} is after --end {}", start, end);
    }
    let client = fmi_client(config)?;
    let database = if store { Some(connect(config).await?) } else { None };
    let place = &config.fmi.observation_place;

    let records = match range {
        ObservationRange::Dates { start, end } => {
            harvest::harvest_observations(&client, database.as_ref(), place, start, end).await
        }
        ObservationRange::History { years, months } => {
            harvest::harvest_observation_history(&client, database.as_ref(), place, years, months)
                .await
        }
    }
    .context("Observation harvest failed")?;

    write_weather(&records, output)
}

async fn run_export(
    config: &AppConfig,
    source: WeatherSource,
    start: NaiveDate,
    end: NaiveDate,
    output: Option<PathBuf>,
) -> Result<()> {
    let database = connect(config).await?;
    let records = database.weather_between(source, start, end).await?;
    tracing::info!("Exporting {} rows from {}", records.len(), source.table());
    write_weather(&records, output)
}

fn write_weather(records: &[WeatherRecord], output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            weather::write_csv(records, file)?;
            tracing::info!("Wrote {} days to {}", records.len(), path.display());
        }
        None => weather::write_csv(records, std::io::stdout())?,
    }
    Ok(())
}

enum TrainingData {
    Csv { weather: PathBuf, visitors: PathBuf },
    Database,
}

async fn load_training_data(
    config: &AppConfig,
    data: TrainingData,
) -> Result<(Vec<WeatherRecord>, Vec<VisitorRecord>)> {
    let classes = config.class_thresholds()?;
    match data {
        TrainingData::Csv { weather: weather_path, visitors: visitors_path } => {
            let weather_file = File::open(&weather_path)
                .with_context(|| format!("Failed to open {}", weather_path.display()))?;
            let weather_records = weather::read_csv(weather_file)
                .with_context(|| format!("Failed to read {}", weather_path.display()))?;

            let visitors_file = File::open(&visitors_path)
                .with_context(|| format!("Failed to open {}", visitors_path.display()))?;
            let visitor_records = visitors::read_csv(visitors_file, &classes)
                .with_context(|| format!("Failed to read {}", visitors_path.display()))?;

            Ok((weather_records, visitor_records))
        }
        TrainingData::Database => {
            let database = connect(config).await?;
            let visitor_records = database.actuals().await?;
            let (Some(first), Some(last)) = (visitor_records.first(), visitor_records.last())
            else {
                anyhow::bail!("No visitor counts stored; use record-actual first");
            };
            let weather_records = database
                .weather_between(WeatherSource::Observation, first.date, last.date)
                .await?;
            Ok((weather_records, visitor_records))
        }
    }
}

async fn run_train(
    config: &AppConfig,
    data: TrainingData,
    folds: Option<usize>,
    store: bool,
    keep_existing: bool,
) -> Result<()> {
    let classes = config.class_thresholds()?;
    let (weather, visitor_records) = load_training_data(config, data).await?;

    let mut options = TrainingOptions::from(&config.model);
    if let Some(folds) = folds {
        options.folds = folds;
    }

    let builder = ModelBuilder::new(&weather, &visitor_records, &classes, options)?;
    let result = builder.train(&SystemClock)?;
    print_training_report(&result.report);

    if store {
        let database = connect(config).await?;
        let (classifier_id, regressor_id) = database
            .replace_models(&result.classifier, &result.regressor, keep_existing)
            .await?;
        println!("Stored classifier {} and regressor {}", classifier_id, regressor_id);
    } else {
        println!(
            "Writing classifier into {}",
            config.model.classifier_path.display()
        );
        result.classifier.save(&config.model.classifier_path)?;
        println!(
            "Writing regression model into {}",
            config.model.regressor_path.display()
        );
        result.regressor.save(&config.model.regressor_path)?;
    }
    Ok(())
}

fn print_training_report(report: &TrainingReport) {
    println!("Training rows: {}", report.rows);
    for (label, count) in &report.class_counts {
        println!("  class {}: {} days", label, count);
    }

    if let Some(scores) = &report.classifier_scores {
        println!("Cross-validation accuracies for classification:");
        println!("{:?}", scores.accuracy);
        println!("Mean accuracy: {:.3}", scores.mean_accuracy());
        println!();
    }
    if let Some(scores) = &report.regression_scores {
        println!("Cross-validation errors for regression:");
        println!("MSE per fold: {:?}", scores.mean_squared_error);
        println!("Mean MAE: {:.1}", scores.mean_mae());
        println!("Mean MSE: {:.1}", scores.mean_mse());
        println!("Mean median AE: {:.1}", scores.mean_median_ae());
        println!();
    }
}

fn run_predict(config: &AppConfig, weather_path: PathBuf) -> Result<()> {
    let classifier = PersistedModel::load(&config.model.classifier_path)?;
    let regressor = PersistedModel::load(&config.model.regressor_path)?;
    tracing::info!("Loaded {}", classifier.summary());
    tracing::info!("Loaded {}", regressor.summary());

    let predictor = VisitorPredictor::from_persisted(classifier, regressor)?;

    let weather_file = File::open(&weather_path)
        .with_context(|| format!("Failed to open {}", weather_path.display()))?;
    let records = weather::read_csv(weather_file)?;
    let predictions = predictor.predict_all(&records)?;

    println!("{}", serde_json::to_string_pretty(&predictions)?);
    Ok(())
}

async fn run_record_actual(config: &AppConfig, date: NaiveDate, count: u32) -> Result<()> {
    let classes = config.class_thresholds()?;
    let database = connect(config).await?;
    let record = harvest::record_actual(&database, &classes, date, count).await?;
    println!(
        "{}: {} visitors, class {} ({})",
        record.date,
        record.visitor_count,
        record.visitor_class(),
        classes.display_label(record.visitor_class()).unwrap_or("?")
    );
    Ok(())
}

async fn run_evaluate(config: &AppConfig, json: bool) -> Result<()> {
    let database = connect(config).await?;
    let report = evaluation::evaluate(&database).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_evaluation(&report, config.evaluation.display_limit);
    }
    Ok(())
}

fn print_evaluation(report: &EvaluationReport, limit: usize) {
    println!("{:<12} {:>10} {:>6} {:>10} {:>6}", "date", "predicted", "class", "actual", "class");
    for row in report.recent(limit) {
        let (actual, actual_class) = match &row.actual {
            Some(a) => (a.visitor_count.to_string(), a.visitor_class().to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<12} {:>10.0} {:>6} {:>10} {:>6}",
            row.prediction.date,
            row.prediction.predicted_visitor_count,
            row.prediction.predicted_visitor_class,
            actual,
            actual_class
        );
    }

    let m = &report.metrics;
    println!();
    println!("Compared: {} ({} awaiting actuals)", m.compared, m.pending);
    let show = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "N/A".to_string());
    println!("Mean absolute error: {}", show(m.mean_absolute_error));
    println!("Median absolute error: {}", show(m.median_absolute_error));
    println!("Mean squared error: {}", show(m.mean_squared_error));
    println!("Class accuracy: {}", show(m.accuracy));
}
