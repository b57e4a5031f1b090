//! Visitor counts and the visitor class binning rule.

use std::collections::HashMap;
use std::io::Read;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::VisitorClassConfig;
use crate::error::{Result, ZooError};

/// Ordinal visitor class label as configured (not necessarily dense).
pub type ClassLabel = u32;

/// One configured class boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassThreshold {
    pub label: ClassLabel,
    pub min: i64,
    pub display_label: String,
}

/// Validated, ascending visitor class thresholds.
///
/// Bins are `[min_i, min_{i+1})`. The first bin extends to negative infinity
/// and the last to positive infinity, so every count maps to a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassThresholds {
    thresholds: Vec<ClassThreshold>,
}

impl ClassThresholds {
    /// Sort by `min` and validate. Mins and labels must both be strictly
    /// increasing in that order.
    pub fn new(mut thresholds: Vec<ClassThreshold>) -> Result<Self> {
        if thresholds.is_empty() {
            return Err(ZooError::Config(
                "at least one visitor class must be configured".to_string(),
            ));
        }

        thresholds.sort_by_key(|t| t.min);

        for pair in thresholds.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if lower.min == upper.min {
                return Err(ZooError::Config(format!(
                    "visitor classes {} and {} share the lower bound {}",
                    lower.label, upper.label, lower.min
                )));
            }
            if lower.label >= upper.label {
                return Err(ZooError::Config(format!(
                    "visitor class labels must increase with their lower bound: \
                     class {} (min {}) is not below class {} (min {})",
                    lower.label, lower.min, upper.label, upper.min
                )));
            }
        }

        tracing::debug!("Visitor classes after sorting: {:?}", thresholds);
        Ok(Self { thresholds })
    }

    pub fn from_config(classes: &[VisitorClassConfig]) -> Result<Self> {
        Self::new(
            classes
                .iter()
                .map(|c| ClassThreshold {
                    label: c.label,
                    min: c.min,
                    display_label: c.display_label.clone(),
                })
                .collect(),
        )
    }

    /// Class label for a visitor count.
    pub fn bin(&self, count: i64) -> ClassLabel {
        // Counts below the first bound fall into the first class.
        let idx = self.thresholds.partition_point(|t| t.min <= count);
        self.thresholds[idx.saturating_sub(1)].label
    }

    pub fn labels(&self) -> Vec<ClassLabel> {
        self.thresholds.iter().map(|t| t.label).collect()
    }

    pub fn thresholds(&self) -> &[ClassThreshold] {
        &self.thresholds
    }

    pub fn display_label(&self, label: ClassLabel) -> Option<&str> {
        self.thresholds
            .iter()
            .find(|t| t.label == label)
            .map(|t| t.display_label.as_str())
    }
}

/// Visitor count for one day with its derived class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub date: NaiveDate,
    pub visitor_count: u32,
    visitor_class: ClassLabel,
}

impl VisitorRecord {
    /// The class is always derived from the count.
    pub fn new(date: NaiveDate, visitor_count: u32, classes: &ClassThresholds) -> Self {
        Self {
            date,
            visitor_count,
            visitor_class: classes.bin(i64::from(visitor_count)),
        }
    }

    /// A record read back from storage, keeping the class it was stored with.
    pub(crate) fn stored(date: NaiveDate, visitor_count: u32, visitor_class: ClassLabel) -> Self {
        Self {
            date,
            visitor_count,
            visitor_class,
        }
    }

    pub fn visitor_class(&self) -> ClassLabel {
        self.visitor_class
    }
}

#[derive(Debug, Deserialize)]
struct VisitorCsvRow {
    #[serde(alias = "datetime")]
    date: NaiveDate,
    visitors: u32,
}

/// Read `date,visitors` rows and bin them with `classes`.
pub fn read_csv<R: Read>(input: R, classes: &ClassThresholds) -> Result<Vec<VisitorRecord>> {
    let mut rdr = csv::Reader::from_reader(input);
    let mut records = Vec::new();
    for row in rdr.deserialize::<VisitorCsvRow>() {
        let row = row?;
        records.push(VisitorRecord::new(row.date, row.visitors, classes));
    }
    Ok(records)
}

/// Each count divided by the mean count of all records on the same weekday.
///
/// Diagnostic only; not part of the default predictors. A weekday whose mean
/// is zero yields 0.0.
pub fn normalized_by_weekday(records: &[VisitorRecord]) -> Vec<f64> {
    let mut sums: HashMap<u32, (f64, usize)> = HashMap::new();
    for r in records {
        let entry = sums
            .entry(r.date.weekday().num_days_from_monday())
            .or_insert((0.0, 0));
        entry.0 += f64::from(r.visitor_count);
        entry.1 += 1;
    }

    records
        .iter()
        .map(|r| {
            let (sum, n) = sums[&r.date.weekday().num_days_from_monday()];
            let mean = sum / n as f64;
            if mean == 0.0 {
                0.0
            } else {
                f64::from(r.visitor_count) / mean
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn threshold(label: ClassLabel, min: i64) -> ClassThreshold {
        ClassThreshold {
            label,
            min,
            display_label: format!("class {}", label),
        }
    }

    fn example_classes() -> ClassThresholds {
        ClassThresholds::new(vec![threshold(0, 0), threshold(1, 101), threshold(2, 251)]).unwrap()
    }

    #[test]
    fn test_bin_example_counts() {
        let classes = example_classes();
        let bins: Vec<_> = [50, 120, 300].iter().map(|c| classes.bin(*c)).collect();
        assert_eq!(bins, vec![0, 1, 2]);
    }

    #[test]
    fn test_bin_boundary_belongs_to_upper_class() {
        let classes = example_classes();
        assert_eq!(classes.bin(100), 0);
        assert_eq!(classes.bin(101), 1);
        assert_eq!(classes.bin(250), 1);
        assert_eq!(classes.bin(251), 2);
    }

    #[test]
    fn test_bin_below_first_bound_is_first_class() {
        let classes =
            ClassThresholds::new(vec![threshold(3, 10), threshold(7, 20)]).unwrap();
        assert_eq!(classes.bin(-5), 3);
        assert_eq!(classes.bin(0), 3);
    }

    #[test]
    fn test_bin_preserves_sparse_labels() {
        let classes =
            ClassThresholds::new(vec![threshold(10, 0), threshold(20, 500), threshold(40, 900)])
                .unwrap();
        assert_eq!(classes.bin(600), 20);
        assert_eq!(classes.bin(1_000_000), 40);
    }

    #[test]
    fn test_new_sorts_unordered_config() {
        let classes =
            ClassThresholds::new(vec![threshold(2, 251), threshold(0, 0), threshold(1, 101)])
                .unwrap();
        assert_eq!(classes.labels(), vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_min_is_config_error() {
        let result = ClassThresholds::new(vec![threshold(0, 0), threshold(1, 0)]);
        assert!(matches!(result, Err(ZooError::Config(_))));
    }

    #[test]
    fn test_labels_out_of_order_is_config_error() {
        let result = ClassThresholds::new(vec![threshold(1, 0), threshold(0, 100)]);
        assert!(matches!(result, Err(ZooError::Config(_))));
    }

    #[test]
    fn test_empty_config_is_config_error() {
        assert!(matches!(ClassThresholds::new(vec![]), Err(ZooError::Config(_))));
    }

    #[test]
    fn test_visitor_record_derives_class() {
        let date = NaiveDate::from_ymd_opt(2017, 3, 1).unwrap();
        let record = VisitorRecord::new(date, 101, &example_classes());
        assert_eq!(record.visitor_class(), 1);
    }

    #[test]
    fn test_display_label_lookup() {
        let classes = example_classes();
        assert_eq!(classes.display_label(1), Some("class 1"));
        assert_eq!(classes.display_label(5), None);
    }

    #[test]
    fn test_read_csv_bins_rows() {
        let input = "datetime,visitors\n2016-01-04,50\n2016-01-05,300\n";
        let records = read_csv(input.as_bytes(), &example_classes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].visitor_class(), 0);
        assert_eq!(records[1].visitor_class(), 2);
    }

    #[test]
    fn test_normalized_by_weekday() {
        let classes = example_classes();
        let monday = NaiveDate::from_ymd_opt(2017, 3, 6).unwrap();
        let next_monday = NaiveDate::from_ymd_opt(2017, 3, 13).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2017, 3, 7).unwrap();

        let records = vec![
            VisitorRecord::new(monday, 100, &classes),
            VisitorRecord::new(next_monday, 300, &classes),
            VisitorRecord::new(tuesday, 0, &classes),
        ];

        let normalized = normalized_by_weekday(&records);
        assert_relative_eq!(normalized[0], 0.5);
        assert_relative_eq!(normalized[1], 1.5);
        assert_eq!(normalized[2], 0.0);
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        fn thresholds_strategy() -> impl Strategy<Value = ClassThresholds> {
            proptest::collection::btree_set(-1000i64..100_000, 1..8).prop_map(|mins| {
                let thresholds = mins
                    .into_iter()
                    .enumerate()
                    .map(|(i, min)| threshold(i as ClassLabel * 2, min))
                    .collect();
                ClassThresholds::new(thresholds).unwrap()
            })
        }

        proptest! {
            #[test]
            fn bin_is_monotonic(classes in thresholds_strategy(), a in -2000i64..200_000, b in -2000i64..200_000) {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                prop_assert!(classes.bin(lo) <= classes.bin(hi));
            }

            #[test]
            fn bin_at_threshold_is_that_class(classes in thresholds_strategy()) {
                for t in classes.thresholds() {
                    prop_assert_eq!(classes.bin(t.min), t.label);
                }
            }
        }
    }
}
