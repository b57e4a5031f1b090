//! Comparing stored predictions against the visitor counts that arrived later.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::ml::Prediction;
use crate::ml::metrics;
use crate::traits::Store;
use crate::visitors::VisitorRecord;

/// One prediction and, once recorded, the actual count for its date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRow {
    pub prediction: Prediction,
    pub actual: Option<VisitorRecord>,
}

impl EvaluationRow {
    pub fn absolute_error(&self) -> Option<f64> {
        self.actual
            .as_ref()
            .map(|a| (self.prediction.predicted_visitor_count - f64::from(a.visitor_count)).abs())
    }

    pub fn class_hit(&self) -> Option<bool> {
        self.actual
            .as_ref()
            .map(|a| a.visitor_class() == self.prediction.predicted_visitor_class)
    }
}

/// Aggregate metrics over the rows that have an actual count.
///
/// All metrics are `None` when no prediction has been matched yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    pub compared: usize,
    pub pending: usize,
    pub mean_absolute_error: Option<f64>,
    pub median_absolute_error: Option<f64>,
    pub mean_squared_error: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Newest date first
    pub rows: Vec<EvaluationRow>,
    pub metrics: EvaluationMetrics,
}

impl EvaluationReport {
    pub fn from_rows(mut rows: Vec<EvaluationRow>) -> Self {
        rows.sort_by(|a, b| b.prediction.date.cmp(&a.prediction.date));

        let (mut predicted, mut actual) = (Vec::new(), Vec::new());
        let (mut predicted_class, mut actual_class) = (Vec::new(), Vec::new());
        for row in &rows {
            if let Some(a) = &row.actual {
                predicted.push(row.prediction.predicted_visitor_count);
                actual.push(f64::from(a.visitor_count));
                predicted_class.push(row.prediction.predicted_visitor_class);
                actual_class.push(a.visitor_class());
            }
        }

        let metrics = EvaluationMetrics {
            compared: predicted.len(),
            pending: rows.len() - predicted.len(),
            mean_absolute_error: metrics::mean_absolute_error(&predicted, &actual),
            median_absolute_error: metrics::median_absolute_error(&predicted, &actual),
            mean_squared_error: metrics::mean_squared_error(&predicted, &actual),
            accuracy: metrics::accuracy(&predicted_class, &actual_class),
        };

        Self { rows, metrics }
    }

    /// Outer join of `predictions` with `actuals` on date.
    ///
    /// Actuals without a prediction are ignored.
    pub fn join(predictions: Vec<Prediction>, actuals: &[VisitorRecord]) -> Self {
        let by_date: HashMap<_, _> = actuals.iter().map(|a| (a.date, a)).collect();
        let rows = predictions
            .into_iter()
            .map(|prediction| EvaluationRow {
                actual: by_date.get(&prediction.date).map(|a| (*a).clone()),
                prediction,
            })
            .collect();
        Self::from_rows(rows)
    }

    /// The first `n` rows, newest first, for display.
    pub fn recent(&self, n: usize) -> &[EvaluationRow] {
        &self.rows[..n.min(self.rows.len())]
    }
}

/// Build the report from everything in the store.
pub async fn evaluate<S: Store>(store: &S) -> Result<EvaluationReport> {
    let pairs = store.predictions_with_actuals().await?;
    let report = EvaluationReport::from_rows(
        pairs
            .into_iter()
            .map(|(prediction, actual)| EvaluationRow { prediction, actual })
            .collect(),
    );
    tracing::info!(
        "Evaluated {} predictions ({} awaiting actual counts)",
        report.metrics.compared,
        report.metrics.pending
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    use super::*;
    use crate::traits::MemoryStore;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 3, d).unwrap()
    }

    fn prediction(d: u32, count: f64, class: u32) -> Prediction {
        Prediction {
            date: date(d),
            predicted_visitor_count: count,
            predicted_visitor_class: class,
            classifier_id: None,
            regression_model_id: None,
        }
    }

    fn actual(d: u32, count: u32, class: u32) -> VisitorRecord {
        VisitorRecord::stored(date(d), count, class)
    }

    #[test]
    fn test_metrics_over_matched_rows_only() {
        let report = EvaluationReport::join(
            vec![
                prediction(1, 1000.0, 1),
                prediction(2, 500.0, 0),
                prediction(3, 800.0, 1),
            ],
            &[actual(1, 900, 1), actual(2, 700, 1)],
        );

        let m = &report.metrics;
        assert_eq!(m.compared, 2);
        assert_eq!(m.pending, 1);
        assert_relative_eq!(m.mean_absolute_error.unwrap(), 150.0);
        assert_relative_eq!(m.median_absolute_error.unwrap(), 150.0);
        assert_relative_eq!(m.mean_squared_error.unwrap(), 25_000.0);
        assert_relative_eq!(m.accuracy.unwrap(), 0.5);
    }

    #[test]
    fn test_rows_are_newest_first_and_keep_pending() {
        let report = EvaluationReport::join(
            vec![prediction(1, 1.0, 0), prediction(3, 3.0, 0), prediction(2, 2.0, 0)],
            &[actual(2, 2, 0)],
        );

        let dates: Vec<_> = report.rows.iter().map(|r| r.prediction.date).collect();
        assert_eq!(dates, vec![date(3), date(2), date(1)]);
        assert!(report.rows[0].actual.is_none());
        assert_eq!(report.rows[1].absolute_error(), Some(0.0));
        assert_eq!(report.rows[1].class_hit(), Some(true));
    }

    #[test]
    fn test_no_actuals_gives_no_metrics() {
        let report = EvaluationReport::join(vec![prediction(1, 1.0, 0)], &[]);
        assert_eq!(report.metrics.compared, 0);
        assert!(report.metrics.mean_absolute_error.is_none());
        assert!(report.metrics.accuracy.is_none());
    }

    #[test]
    fn test_actual_without_prediction_is_ignored() {
        let report = EvaluationReport::join(vec![], &[actual(1, 100, 0)]);
        assert!(report.rows.is_empty());
        assert_eq!(report.metrics, EvaluationMetrics::default());
    }

    #[test]
    fn test_recent_limits_rows() {
        let report = EvaluationReport::join(
            (1..=5).map(|d| prediction(d, 0.0, 0)).collect(),
            &[],
        );
        assert_eq!(report.recent(2).len(), 2);
        assert_eq!(report.recent(2)[0].prediction.date, date(5));
        assert_eq!(report.recent(50).len(), 5);
    }

    #[tokio::test]
    async fn test_evaluate_from_store() {
        let store = MemoryStore::new();
        store.insert_prediction(&prediction(1, 110.0, 1)).await.unwrap();
        store.insert_prediction(&prediction(2, 90.0, 0)).await.unwrap();
        store.insert_actual(&actual(1, 100, 1)).await.unwrap();

        let report = evaluate(&store).await.unwrap();

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.metrics.compared, 1);
        assert_relative_eq!(report.metrics.mean_absolute_error.unwrap(), 10.0);
        assert_relative_eq!(report.metrics.accuracy.unwrap(), 1.0);
    }
}
