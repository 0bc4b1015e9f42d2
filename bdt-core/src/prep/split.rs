//! Chronological train/validation/test partitioning.
//!
//! Partitions are cut on distinct dates, never on rows, so every row of a
//! given date lands in the same partition and no future date leaks into an
//! earlier partition.

use super::schema::{date_days, days_to_date, normalize_date, require_columns, DATE};
use super::PrepError;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Fractions of the distinct dates assigned to train and validation.
/// The test partition receives the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            val: 0.15,
        }
    }
}

impl SplitRatios {
    pub fn new(train: f64, val: f64) -> Self {
        Self { train, val }
    }

    /// Require `0 < train`, `0 <= val` and `train + val < 1`, all finite.
    pub fn validate(&self) -> Result<(), PrepError> {
        let Self { train, val } = *self;
        if !train.is_finite() || !val.is_finite() {
            return Err(PrepError::Configuration(format!(
                "split ratios must be finite (train={train}, val={val})"
            )));
        }
        if train <= 0.0 {
            return Err(PrepError::Configuration(format!(
                "train ratio must be positive, got {train}"
            )));
        }
        if val < 0.0 {
            return Err(PrepError::Configuration(format!(
                "val ratio must not be negative, got {val}"
            )));
        }
        if train + val >= 1.0 {
            return Err(PrepError::Configuration(format!(
                "train + val must leave room for a test partition, got {}",
                train + val
            )));
        }
        Ok(())
    }
}

/// The three partitions plus the boundary dates that produced them.
///
/// `train` holds dates `<= train_end`, `val` dates in `(train_end, val_end]`,
/// `test` dates `> val_end`. Boundaries are `None` only for an empty input.
#[derive(Debug, Clone)]
pub struct TemporalSplit {
    pub train: DataFrame,
    pub val: DataFrame,
    pub test: DataFrame,
    pub train_end: Option<NaiveDate>,
    pub val_end: Option<NaiveDate>,
}

impl TemporalSplit {
    /// Row counts of (train, val, test).
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.height(), self.val.height(), self.test.height())
    }
}

/// Partition `df` chronologically by its `date` column.
///
/// With `n` distinct dates sorted ascending, `train_end` is the date at
/// index `floor(n * train)` and `val_end` the date at index
/// `floor(n * (train + val))`. Rows with a null date belong to no partition.
pub fn temporal_split(df: &DataFrame, ratios: SplitRatios) -> Result<TemporalSplit, PrepError> {
    ratios.validate()?;

    if df.height() == 0 {
        return Ok(TemporalSplit {
            train: df.clone(),
            val: df.clone(),
            test: df.clone(),
            train_end: None,
            val_end: None,
        });
    }
    require_columns(df, &[DATE])?;

    let dated = normalize_date(df)?;
    let days = date_days(&dated)?;
    let distinct: Vec<i32> = days
        .iter()
        .flatten()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if distinct.is_empty() {
        return Err(PrepError::Configuration(
            "cannot split a table whose dates are all null".into(),
        ));
    }

    let n = distinct.len();
    let train_idx = boundary_index(n, ratios.train);
    let val_idx = boundary_index(n, ratios.train + ratios.val);
    let train_end = distinct[train_idx];
    let val_end = distinct[val_idx];

    let day = col(DATE).cast(DataType::Int32);
    let lazy = dated.lazy();
    let train = lazy
        .clone()
        .filter(day.clone().lt_eq(lit(train_end)))
        .collect()?;
    let val = lazy
        .clone()
        .filter(day.clone().gt(lit(train_end)).and(day.clone().lt_eq(lit(val_end))))
        .collect()?;
    let test = lazy.filter(day.gt(lit(val_end))).collect()?;

    let undated = days.iter().filter(|d| d.is_none()).count();
    if undated > 0 {
        warn!(rows = undated, "rows with a null date were left out of the split");
    }

    let split = TemporalSplit {
        train,
        val,
        test,
        train_end: days_to_date(train_end),
        val_end: days_to_date(val_end),
    };
    log_partitions(&split, n);
    Ok(split)
}

/// `floor(n * ratio)`, clamped to a valid index.
fn boundary_index(n: usize, ratio: f64) -> usize {
    let idx = (n as f64 * ratio).floor() as usize;
    idx.min(n - 1)
}

/// First and last date of a partition.
pub fn date_range(df: &DataFrame) -> Option<(NaiveDate, NaiveDate)> {
    let days = date_days(df).ok()?;
    let first = days.iter().flatten().min()?;
    let last = days.iter().flatten().max()?;
    Some((days_to_date(*first)?, days_to_date(*last)?))
}

fn log_partitions(split: &TemporalSplit, distinct_dates: usize) {
    let fmt = |df: &DataFrame| match date_range(df) {
        Some((a, b)) => format!("{a}..={b}"),
        None => "empty".to_string(),
    };
    let (train, val, test) = split.sizes();
    info!(
        distinct_dates,
        train_end = ?split.train_end,
        val_end = ?split.val_end,
        "temporal split boundaries"
    );
    info!(rows = train, range = %fmt(&split.train), "train partition");
    info!(rows = val, range = %fmt(&split.val), "val partition");
    info!(rows = test, range = %fmt(&split.test), "test partition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
    }

    fn frame_with_dates(n: usize, per_date: usize) -> DataFrame {
        let mut dates = Vec::new();
        let mut tickers = Vec::new();
        for i in 0..n {
            for t in 0..per_date {
                dates.push((start() + Duration::days(i as i64)).to_string());
                tickers.push(format!("T{t}"));
            }
        }
        df!("ticker" => tickers, "date" => dates).unwrap()
    }

    #[test]
    fn hundred_dates_default_ratios() {
        let split = temporal_split(&frame_with_dates(100, 1), SplitRatios::default()).unwrap();

        assert_eq!(split.train_end, Some(start() + Duration::days(70)));
        assert_eq!(split.val_end, Some(start() + Duration::days(85)));
        assert_eq!(split.sizes(), (71, 15, 14));
    }

    #[test]
    fn rows_sharing_a_date_stay_together() {
        let split = temporal_split(&frame_with_dates(10, 3), SplitRatios::new(0.5, 0.2)).unwrap();
        let (train, val, test) = split.sizes();
        assert_eq!(train + val + test, 30);
        assert_eq!(train % 3, 0);
        assert_eq!(val % 3, 0);
        assert_eq!(test % 3, 0);

        let (_, train_last) = date_range(&split.train).unwrap();
        let (val_first, _) = date_range(&split.val).unwrap();
        assert!(train_last < val_first);
    }

    #[test]
    fn zero_val_ratio_leaves_val_empty() {
        let split = temporal_split(&frame_with_dates(10, 1), SplitRatios::new(0.6, 0.0)).unwrap();
        assert_eq!(split.val.height(), 0);
        assert_eq!(split.train_end, split.val_end);
    }

    #[test]
    fn empty_input_yields_three_empty_partitions() {
        let df = df!("date" => Vec::<&str>::new()).unwrap();
        let split = temporal_split(&df, SplitRatios::default()).unwrap();
        assert_eq!(split.sizes(), (0, 0, 0));
        assert!(split.train_end.is_none());
    }

    #[test]
    fn invalid_ratios_are_rejected() {
        let df = frame_with_dates(5, 1);
        for (train, val) in [
            (0.0, 0.1),
            (-0.1, 0.1),
            (0.7, -0.1),
            (0.7, 0.3),
            (0.9, 0.2),
            (f64::NAN, 0.1),
            (0.5, f64::INFINITY),
        ] {
            let err = temporal_split(&df, SplitRatios::new(train, val)).unwrap_err();
            assert!(
                matches!(err, PrepError::Configuration(_)),
                "({train}, {val}) should be rejected"
            );
        }
    }

    #[test]
    fn invalid_ratios_fail_even_on_empty_input() {
        let df = df!("date" => Vec::<&str>::new()).unwrap();
        assert!(temporal_split(&df, SplitRatios::new(1.0, 0.0)).is_err());
    }

    #[test]
    fn single_date_goes_to_train() {
        let split = temporal_split(&frame_with_dates(1, 4), SplitRatios::default()).unwrap();
        assert_eq!(split.sizes(), (4, 0, 0));
    }
}
