//! Error metrics and k-fold splitting shared by training and evaluation.

use serde::{Deserialize, Serialize};

use crate::visitors::ClassLabel;

/// Fraction of positions where `predicted` equals `actual`.
///
/// Returns `None` for empty or mismatched inputs.
pub fn accuracy(predicted: &[ClassLabel], actual: &[ClassLabel]) -> Option<f64> {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return None;
    }
    let hits = predicted.iter().zip(actual).filter(|(p, a)| p == a).count();
    Some(hits as f64 / predicted.len() as f64)
}

pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let errors = absolute_errors(predicted, actual)?;
    Some(errors.iter().sum::<f64>() / errors.len() as f64)
}

pub fn mean_squared_error(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let errors = absolute_errors(predicted, actual)?;
    Some(errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64)
}

pub fn median_absolute_error(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let mut errors = absolute_errors(predicted, actual)?;
    errors.sort_by(|a, b| a.total_cmp(b));
    let mid = errors.len() / 2;
    if errors.len() % 2 == 0 {
        Some((errors[mid - 1] + errors[mid]) / 2.0)
    } else {
        Some(errors[mid])
    }
}

fn absolute_errors(predicted: &[f64], actual: &[f64]) -> Option<Vec<f64>> {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return None;
    }
    Some(
        predicted
            .iter()
            .zip(actual)
            .map(|(p, a)| (p - a).abs())
            .collect(),
    )
}

/// One train/test split of row indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split `0..n` into `k` contiguous, unshuffled test folds.
///
/// The first `n % k` folds get one extra row. Callers must ensure
/// `1 <= k <= n`.
pub fn k_fold(n: usize, k: usize) -> Vec<Fold> {
    let base = n / k;
    let extra = n % k;

    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let size = base + usize::from(i < extra);
        let end = start + size;
        folds.push(Fold {
            train: (0..start).chain(end..n).collect(),
            test: (start..end).collect(),
        });
        start = end;
    }
    folds
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Per-fold accuracy of the classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierScores {
    pub accuracy: Vec<f64>,
}

impl ClassifierScores {
    pub fn mean_accuracy(&self) -> f64 {
        mean(&self.accuracy)
    }
}

/// Per-fold error metrics of the regressor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionScores {
    pub mean_absolute_error: Vec<f64>,
    pub mean_squared_error: Vec<f64>,
    pub median_absolute_error: Vec<f64>,
}

impl RegressionScores {
    pub fn mean_mae(&self) -> f64 {
        mean(&self.mean_absolute_error)
    }

    pub fn mean_mse(&self) -> f64 {
        mean(&self.mean_squared_error)
    }

    pub fn mean_median_ae(&self) -> f64 {
        mean(&self.median_absolute_error)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 2, 2], &[0, 1, 1, 2]), Some(0.75));
        assert_eq!(accuracy(&[], &[]), None);
        assert_eq!(accuracy(&[1], &[1, 2]), None);
    }

    #[test]
    fn test_mean_absolute_error() {
        let mae = mean_absolute_error(&[1000.0, 500.0], &[900.0, 700.0]).unwrap();
        assert_relative_eq!(mae, 150.0);
    }

    #[test]
    fn test_mean_squared_error() {
        let predictions = vec![10.0, 20.0, 30.0];
        let targets = vec![12.0, 18.0, 32.0];

        // ((10-12)^2 + (20-18)^2 + (30-32)^2) / 3 = 4
        let mse = mean_squared_error(&predictions, &targets).unwrap();
        assert_relative_eq!(mse, 4.0);
    }

    #[test]
    fn test_median_absolute_error_odd_and_even() {
        assert_relative_eq!(
            median_absolute_error(&[1.0, 2.0, 10.0], &[0.0, 0.0, 0.0]).unwrap(),
            2.0
        );
        assert_relative_eq!(
            median_absolute_error(&[1.0, 3.0, 5.0, 100.0], &[0.0; 4]).unwrap(),
            4.0
        );
    }

    #[test]
    fn test_regression_metrics_empty() {
        assert!(mean_absolute_error(&[], &[]).is_none());
        assert!(mean_squared_error(&[1.0], &[]).is_none());
        assert!(median_absolute_error(&[], &[]).is_none());
    }

    #[test]
    fn test_k_fold_sizes() {
        let folds = k_fold(10, 3);
        let sizes: Vec<_> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(folds[0].test, vec![0, 1, 2, 3]);
        assert_eq!(folds[1].train, vec![0, 1, 2, 3, 7, 8, 9]);
    }

    #[test]
    fn test_k_fold_single_fold_has_empty_train() {
        let folds = k_fold(4, 1);
        assert_eq!(folds.len(), 1);
        assert!(folds[0].train.is_empty());
        assert_eq!(folds[0].test, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_score_means() {
        let scores = RegressionScores {
            mean_absolute_error: vec![1.0, 3.0],
            mean_squared_error: vec![2.0, 4.0],
            median_absolute_error: vec![0.5, 1.5],
        };
        assert_relative_eq!(scores.mean_mae(), 2.0);
        assert_relative_eq!(scores.mean_mse(), 3.0);
        assert_relative_eq!(scores.mean_median_ae(), 1.0);
        assert!(ClassifierScores::default().mean_accuracy().is_nan());
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn k_fold_partitions_every_row(n in 1usize..200, k in 1usize..20) {
                prop_assume!(k <= n);
                let folds = k_fold(n, k);
                prop_assert_eq!(folds.len(), k);

                let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
                seen.sort_unstable();
                prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());

                for fold in &folds {
                    prop_assert!(!fold.test.is_empty());
                    prop_assert_eq!(fold.train.len() + fold.test.len(), n);
                }
            }

            #[test]
            fn median_never_exceeds_max(errors in proptest::collection::vec(0.0f64..1e6, 1..50)) {
                let zeros = vec![0.0; errors.len()];
                let median = median_absolute_error(&errors, &zeros).unwrap();
                let max = errors.iter().cloned().fold(0.0, f64::max);
                prop_assert!(median <= max);
            }
        }
    }
}
