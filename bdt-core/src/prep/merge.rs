//! Align prices, technicals and macro series into one per-(ticker, date) table.
//!
//! Prices are the base relation. Technicals join on (ticker, date); macro
//! series are pivoted to one column per series, forward-filled down the date
//! axis and joined on date alone. Every join is a left join against the base,
//! so the output has exactly one row per input price row, in input order.

use super::schema::{date_days, normalize_date, require_columns, DATE, TICKER};
use super::PrepError;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Column holding a macro observation's value.
pub const MACRO_VALUE: &str = "value";

/// Temporary column used to restore base row order after a join.
const ROW_INDEX: &str = "__base_row";

/// Which macro column names a series. Chosen by the caller, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroKey {
    /// Human-readable `name` column.
    Name,
    /// Store identifier `series_id` column.
    SeriesId,
}

impl MacroKey {
    pub fn column(&self) -> &'static str {
        match self {
            MacroKey::Name => "name",
            MacroKey::SeriesId => "series_id",
        }
    }
}

/// Merge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub macro_key: MacroKey,
    /// Appended to technical columns whose names clash with price columns.
    pub technical_suffix: String,
    /// Appended to macro series whose names clash with existing columns.
    pub macro_suffix: String,
}

impl MergeOptions {
    pub fn new(macro_key: MacroKey) -> Self {
        Self {
            macro_key,
            technical_suffix: "_tech".to_string(),
            macro_suffix: "_macro".to_string(),
        }
    }
}

/// Merge prices with optional technicals and macro tables.
///
/// Absent or empty `technicals` / `macro_table` are skipped. Duplicate keys
/// on the optional sides resolve to the first occurrence.
pub fn merge(
    prices: &DataFrame,
    technicals: Option<&DataFrame>,
    macro_table: Option<&DataFrame>,
    opts: &MergeOptions,
) -> Result<DataFrame, PrepError> {
    if prices.height() == 0 {
        return Err(PrepError::MissingRequiredSource("prices".to_string()));
    }
    require_columns(prices, &[TICKER, DATE])?;

    let mut merged = normalize_date(prices)?;

    match technicals.filter(|t| t.height() > 0) {
        Some(tech) => merged = join_technicals(&merged, tech, opts)?,
        None => debug!("technicals absent or empty, skipping"),
    }

    match macro_table.filter(|m| m.height() > 0) {
        Some(m) => {
            let wide = pivot_macro(m, &merged, opts.macro_key)?;
            merged = left_join_preserving(&merged, wide.lazy(), &[DATE], &opts.macro_suffix)?;
        }
        None => debug!("macro absent or empty, skipping"),
    }

    info!(rows = merged.height(), columns = merged.width(), "merged sources");
    Ok(merged)
}

fn join_technicals(
    base: &DataFrame,
    technicals: &DataFrame,
    opts: &MergeOptions,
) -> Result<DataFrame, PrepError> {
    require_columns(technicals, &[TICKER, DATE])?;
    let tech = normalize_date(technicals)?.lazy().unique_stable(
        Some(vec![TICKER.into(), DATE.into()]),
        UniqueKeepStrategy::First,
    );
    left_join_preserving(base, tech, &[TICKER, DATE], &opts.technical_suffix)
}

/// Left join `right` onto `base`, keeping base row order and count.
///
/// `right` must be unique on `keys`.
fn left_join_preserving(
    base: &DataFrame,
    right: LazyFrame,
    keys: &[&str],
    suffix: &str,
) -> Result<DataFrame, PrepError> {
    let on: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let joined = base
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .join(
            right,
            on.clone(),
            on,
            JoinArgs::new(JoinType::Left).with_suffix(Some(suffix.into())),
        )
        .sort([ROW_INDEX], SortMultipleOptions::default())
        .collect()?;
    Ok(joined.drop(ROW_INDEX)?)
}

/// Pivot long macro rows to one column per series, forward-filled.
///
/// The date axis is the union of macro dates and `base` dates, so a price
/// date that falls between two macro releases inherits the earlier release.
/// Cells before a series' first observation stay null.
pub fn pivot_macro(
    macro_table: &DataFrame,
    base: &DataFrame,
    key: MacroKey,
) -> Result<DataFrame, PrepError> {
    let key_col = key.column();
    require_columns(macro_table, &[DATE, key_col, MACRO_VALUE])?;

    let long = normalize_date(macro_table)?
        .lazy()
        .select([
            col(DATE),
            col(key_col).cast(DataType::String),
            col(MACRO_VALUE).cast(DataType::Float64),
        ])
        .filter(col(key_col).is_not_null().and(col(DATE).is_not_null()))
        .unique_stable(
            Some(vec![DATE.into(), key_col.into()]),
            UniqueKeepStrategy::First,
        )
        .collect()?;

    let names: BTreeSet<String> = long
        .column(key_col)?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();

    let mut axis: BTreeSet<i32> = date_days(&long)?.into_iter().flatten().collect();
    axis.extend(date_days(base)?.into_iter().flatten());
    let axis = Column::new(DATE.into(), axis.into_iter().collect::<Vec<i32>>())
        .cast(&DataType::Date)?;
    let mut wide = DataFrame::new(vec![axis])?;

    let mut series_cols = Vec::with_capacity(names.len());
    for name in &names {
        if name == DATE {
            warn!(series = %name, "macro series collides with the date column, skipping");
            continue;
        }
        let series = long
            .clone()
            .lazy()
            .filter(col(key_col).eq(lit(name.as_str())))
            .select([col(DATE), col(MACRO_VALUE).alias(name.as_str())]);
        wide = wide
            .lazy()
            .join(series, [col(DATE)], [col(DATE)], JoinArgs::new(JoinType::Left))
            .collect()?;
        series_cols.push(name.as_str());
    }

    let mut wide = wide.sort([DATE], SortMultipleOptions::default())?;
    for name in series_cols {
        let filled = wide
            .column(name)?
            .as_materialized_series()
            .fill_null(FillNullStrategy::Forward(None))?;
        wide.with_column(filled)?;
    }

    debug!(series = names.len(), dates = wide.height(), "pivoted macro series");
    Ok(wide)
}
