//! Forward-return target construction.
//!
//! For each row, look `horizon` observations ahead within the same ticker:
//! `fwd_return = close_future / close - 1`, `target = 1` if it is positive.
//! Rows whose forward price cannot be determined are dropped, so no labeled
//! row ever carries an unknown future.

use super::schema::{
    normalize_date, require_columns, CLOSE, CLOSE_FUTURE, DATE, FWD_RETURN, TARGET, TICKER,
};
use super::PrepError;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default look-ahead, in observations (roughly one trading month).
pub const DEFAULT_HORIZON: usize = 20;

/// Row accounting for one labeling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelReport {
    pub input_rows: usize,
    pub labeled_rows: usize,
    /// Trailing rows with no observation `horizon` steps ahead.
    pub insufficient_history: usize,
    /// Rows rejected because `close` or `close_future` was missing,
    /// non-finite, or not positive.
    pub invalid_price: usize,
    /// Rows with no ticker; they belong to no series.
    #[serde(default)]
    pub missing_ticker: usize,
}

/// Add `close_future`, `fwd_return` and `target`; drop unlabelable rows.
///
/// The output is sorted by (ticker, date).
pub fn create_target(df: &DataFrame, horizon: usize) -> Result<DataFrame, PrepError> {
    create_target_with_report(df, horizon).map(|(labeled, _)| labeled)
}

/// [`create_target`] plus the row accounting.
pub fn create_target_with_report(
    df: &DataFrame,
    horizon: usize,
) -> Result<(DataFrame, LabelReport), PrepError> {
    if horizon == 0 {
        return Err(PrepError::Configuration(
            "horizon must be at least one observation".into(),
        ));
    }
    if df.height() == 0 {
        return Ok((df.clone(), LabelReport::default()));
    }
    require_columns(df, &[TICKER, DATE, CLOSE])?;

    let sorted = normalize_date(df)?
        .lazy()
        .sort(
            [TICKER, DATE],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?;

    let n = sorted.height();
    let tickers_col = sorted.column(TICKER)?.cast(&DataType::String)?;
    let tickers: Vec<Option<&str>> = tickers_col.str()?.into_iter().collect();
    let closes_col = sorted.column(CLOSE)?.cast(&DataType::Float64)?;
    let closes: Vec<Option<f64>> = closes_col.f64()?.into_iter().collect();

    let mut close_future: Vec<Option<f64>> = vec![None; n];
    let mut fwd_return: Vec<Option<f64>> = vec![None; n];
    let mut target: Vec<Option<i32>> = vec![None; n];
    let mut keep = vec![false; n];
    let mut report = LabelReport {
        input_rows: n,
        ..Default::default()
    };

    for i in 0..n {
        if tickers[i].is_none() {
            report.missing_ticker += 1;
            continue;
        }
        let j = i + horizon;
        // Rows are grouped by ticker, so i and j share a ticker only if
        // every row between them does.
        if j >= n || tickers[j] != tickers[i] {
            report.insufficient_history += 1;
            continue;
        }

        match (valid_price(closes[i]), valid_price(closes[j])) {
            (Some(now), Some(future)) => {
                let ret = future / now - 1.0;
                close_future[i] = Some(future);
                fwd_return[i] = Some(ret);
                target[i] = Some(i32::from(ret > 0.0));
                keep[i] = true;
            }
            _ => report.invalid_price += 1,
        }
    }

    let mut labeled = sorted;
    labeled.with_column(Column::new(CLOSE_FUTURE.into(), close_future))?;
    labeled.with_column(Column::new(FWD_RETURN.into(), fwd_return))?;
    labeled.with_column(Column::new(TARGET.into(), target))?;
    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    let labeled = labeled.filter(&mask)?;
    report.labeled_rows = labeled.height();

    if report.missing_ticker > 0 {
        warn!(rows = report.missing_ticker, "dropped rows without a ticker");
    }
    if report.invalid_price > 0 {
        warn!(
            rows = report.invalid_price,
            "rejected rows with missing, non-finite or non-positive close prices"
        );
    }
    info!(
        horizon,
        input = report.input_rows,
        labeled = report.labeled_rows,
        insufficient_history = report.insufficient_history,
        "created forward-return target"
    );
    Ok((labeled, report))
}

fn valid_price(price: Option<f64>) -> Option<f64> {
    price.filter(|p| p.is_finite() && *p > 0.0)
}
