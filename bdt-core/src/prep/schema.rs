//! Canonical column names and date handling shared by every stage.

use super::PrepError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;

pub const TICKER: &str = "ticker";
pub const DATE: &str = "date";
pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const ADJ_CLOSE: &str = "adj_close";
pub const VOLUME: &str = "volume";
pub const CLOSE_FUTURE: &str = "close_future";
pub const FWD_RETURN: &str = "fwd_return";
pub const TARGET: &str = "target";

/// Columns of a price table after loading.
pub const PRICE_COLUMNS: [&str; 8] = [TICKER, DATE, OPEN, HIGH, LOW, CLOSE, ADJ_CLOSE, VOLUME];

/// Identifier and label columns that must never be fed to a model.
pub const NON_FEATURE_COLUMNS: [&str; 5] = [TICKER, DATE, TARGET, FWD_RETURN, CLOSE_FUTURE];

/// `NaiveDate::num_days_from_ce` of 1970-01-01, the epoch of polars `Date`.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Days since 1970-01-01 (the physical value of a polars `Date`).
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)
}

/// Parse the date forms the table store emits: `YYYY-MM-DD`, RFC 3339, and
/// naive timestamps with `T` or space separators.
pub fn parse_date(raw: &str) -> Result<NaiveDate, PrepError> {
    let s = raw.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.date_naive()))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date()))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").map(|dt| dt.date()))
        .map_err(|_| PrepError::InvalidDate(raw.to_string()))
}

/// Return `df` with its `date` column converted to polars `Date`.
///
/// Frames without a `date` column, or whose `date` is already `Date`, are
/// returned as-is.
pub fn normalize_date(df: &DataFrame) -> Result<DataFrame, PrepError> {
    let Ok(column) = df.column(DATE) else {
        return Ok(df.clone());
    };

    let normalized = match column.dtype() {
        DataType::Date => return Ok(df.clone()),
        DataType::Datetime(_, _) => column.cast(&DataType::Date)?,
        DataType::String => {
            let days = column
                .str()?
                .into_iter()
                .map(|v| v.map(|s| parse_date(s).map(date_to_days)).transpose())
                .collect::<Result<Vec<Option<i32>>, PrepError>>()?;
            Column::new(DATE.into(), days).cast(&DataType::Date)?
        }
        other => {
            return Err(PrepError::InvalidDate(format!(
                "unsupported dtype {other:?} for column '{DATE}'"
            )))
        }
    };

    let mut out = df.clone();
    out.with_column(normalized)?;
    Ok(out)
}

/// Physical day numbers of the `date` column (which must already be `Date`).
pub fn date_days(df: &DataFrame) -> Result<Vec<Option<i32>>, PrepError> {
    let physical = df
        .column(DATE)
        .map_err(|_| PrepError::MissingColumn(DATE.to_string()))?
        .cast(&DataType::Int32)?;
    Ok(physical.i32()?.into_iter().collect())
}

/// Fail with `MissingColumn` for the first absent name.
pub fn require_columns(df: &DataFrame, names: &[&str]) -> Result<(), PrepError> {
    for name in names {
        if df.column(name).is_err() {
            return Err(PrepError::MissingColumn(name.to_string()));
        }
    }
    Ok(())
}

/// Numeric columns usable as model inputs, in frame order.
pub fn feature_columns(df: &DataFrame) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|c| c.dtype().is_primitive_numeric())
        .map(|c| c.name().to_string())
        .filter(|name| !NON_FEATURE_COLUMNS.contains(&name.as_str()))
        .collect()
}
