//! Loaders for the three source tables.
//!
//! Each loader builds the remote query, goes through the cache-first
//! fetcher, renames remote columns to the canonical schema and normalizes
//! `date`. `Ok(None)` means the table is unavailable (see `TableFetcher::fetch`).

use super::fetch::TableFetcher;
use super::provider::{DataError, TableQuery};
use crate::prep::schema::{self, normalize_date};
use chrono::NaiveDate;
use polars::prelude::*;

pub const TABLE_PRICES: &str = "prices_daily";
pub const TABLE_MACRO: &str = "macro_indicators";
pub const TABLE_TECHNICALS: &str = "technical_indicators";

pub const PRICES_CACHE: &str = "prices.parquet";
pub const MACRO_CACHE: &str = "macro.parquet";
pub const TECHNICALS_CACHE: &str = "technicals.parquet";

const REMOTE_SYMBOL: &str = "symbol";
const REMOTE_TRADE_DATE: &str = "trade_date";

/// Columns requested from the price table, in remote naming.
const PRICE_SELECT: [&str; 8] = [
    REMOTE_SYMBOL,
    REMOTE_TRADE_DATE,
    "open_price",
    "high_price",
    "low_price",
    "close_price",
    "adj_close",
    "volume",
];

/// Remote → canonical column names.
const RENAMES: [(&str, &str); 6] = [
    (REMOTE_SYMBOL, schema::TICKER),
    (REMOTE_TRADE_DATE, schema::DATE),
    ("open_price", schema::OPEN),
    ("high_price", schema::HIGH),
    ("low_price", schema::LOW),
    ("close_price", schema::CLOSE),
];

/// Daily prices for `tickers` (all tickers when empty) from `start_date` on.
pub fn load_prices<S: AsRef<str>>(
    fetcher: &TableFetcher,
    tickers: &[S],
    start_date: Option<NaiveDate>,
    force_reload: bool,
) -> Result<Option<DataFrame>, DataError> {
    let mut query = with_symbol_filter(TableQuery::new().select(&PRICE_SELECT), tickers);
    if let Some(start) = start_date {
        query = query.gte(REMOTE_TRADE_DATE, &start.format("%Y-%m-%d").to_string());
    }
    let query = query.order(REMOTE_TRADE_DATE, true);

    fetcher
        .fetch(TABLE_PRICES, &query, Some(PRICES_CACHE), force_reload)
        .map(standardize)
        .transpose()
}

/// All macro series, in long form.
pub fn load_macro(
    fetcher: &TableFetcher,
    force_reload: bool,
) -> Result<Option<DataFrame>, DataError> {
    fetcher
        .fetch(TABLE_MACRO, &TableQuery::new(), Some(MACRO_CACHE), force_reload)
        .map(standardize)
        .transpose()
}

/// Technical indicators for `tickers` (all tickers when empty).
pub fn load_technicals<S: AsRef<str>>(
    fetcher: &TableFetcher,
    tickers: &[S],
    force_reload: bool,
) -> Result<Option<DataFrame>, DataError> {
    let query = with_symbol_filter(TableQuery::new(), tickers);
    fetcher
        .fetch(TABLE_TECHNICALS, &query, Some(TECHNICALS_CACHE), force_reload)
        .map(standardize)
        .transpose()
}

fn with_symbol_filter<S: AsRef<str>>(query: TableQuery, tickers: &[S]) -> TableQuery {
    match tickers {
        [] => query,
        [one] => query.eq(REMOTE_SYMBOL, one.as_ref()),
        many => query.in_list(REMOTE_SYMBOL, many),
    }
}

/// Rename remote columns and parse `date`. Empty tables pass through.
pub fn standardize(mut df: DataFrame) -> Result<DataFrame, DataError> {
    if df.height() == 0 {
        return Ok(df);
    }
    for (remote, canonical) in RENAMES {
        let has_remote = df.column(remote).is_ok();
        let has_canonical = df.column(canonical).is_ok();
        if has_remote && !has_canonical {
            df.rename(remote, canonical.into())
                .map_err(|e| DataError::Other(format!("rename {remote}: {e}")))?;
        }
    }
    normalize_date(&df).map_err(|e| DataError::ValidationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{TableCache, TableProvider};
    use std::sync::{Arc, Mutex};

    type Recorded = Arc<Mutex<Option<(String, Vec<(String, String)>)>>>;

    /// Records the last query and returns a fixed remote-shaped table.
    struct RecordingProvider {
        last: Recorded,
    }

    impl TableProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn fetch_table(&self, table: &str, query: &TableQuery) -> Result<DataFrame, DataError> {
            if let Ok(mut last) = self.last.lock() {
                *last = Some((table.to_string(), query.to_pairs()));
            }
            Ok(df!(
                "symbol" => &["AAPL"],
                "trade_date" => &["2024-01-02"],
                "open_price" => &[1.0],
                "high_price" => &[2.0],
                "low_price" => &[0.5],
                "close_price" => &[1.5],
                "adj_close" => &[1.5],
                "volume" => &[100.0],
            )
            .unwrap())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn price_query_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let last: Recorded = Arc::default();
        let provider = RecordingProvider {
            last: Arc::clone(&last),
        };
        let fetcher = TableFetcher::new(provider, TableCache::new(dir.path()));
        let start = NaiveDate::from_ymd_opt(2020, 1, 1);

        let df = load_prices(&fetcher, &["AAPL", "MSFT"], start, false)
            .unwrap()
            .unwrap();

        let names: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, schema::PRICE_COLUMNS.to_vec());
        assert_eq!(df.column(schema::DATE).unwrap().dtype(), &DataType::Date);
        assert!(fetcher.cache().contains(PRICES_CACHE));

        let (table, pairs) = last.lock().unwrap().clone().unwrap();
        assert_eq!(table, TABLE_PRICES);
        let pair = |k: &str, v: &str| (k.to_string(), v.to_string());
        assert_eq!(
            pairs,
            vec![
                pair(
                    "select",
                    "symbol,trade_date,open_price,high_price,low_price,close_price,adj_close,volume"
                ),
                pair("symbol", "in.(AAPL,MSFT)"),
                pair("trade_date", "gte.2020-01-01"),
                pair("order", "trade_date.asc"),
            ]
        );
    }

    #[test]
    fn single_ticker_uses_eq_filter() {
        let q = with_symbol_filter(TableQuery::new(), &["AAPL"]);
        assert!(q
            .to_pairs()
            .contains(&("symbol".to_string(), "eq.AAPL".to_string())));

        let q = with_symbol_filter(TableQuery::new(), &["AAPL", "GOOG"]);
        assert!(q
            .to_pairs()
            .contains(&("symbol".to_string(), "in.(AAPL,GOOG)".to_string())));

        let none: [&str; 0] = [];
        assert_eq!(with_symbol_filter(TableQuery::new(), &none).to_pairs().len(), 1);
    }

    #[test]
    fn standardize_keeps_existing_canonical_columns() {
        let df = df!(
            "symbol" => &["AAPL"],
            "ticker" => &["AAPL"],
            "date" => &["2024-01-02"],
        )
        .unwrap();
        let out = standardize(df).unwrap();
        assert!(out.column("symbol").is_ok());
        assert_eq!(out.column("date").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn bad_dates_are_a_validation_error() {
        let df = df!("date" => &["yesterday"]).unwrap();
        assert!(matches!(
            standardize(df),
            Err(DataError::ValidationError(_))
        ));
    }

    #[test]
    fn offline_miss_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = TableFetcher::offline(TableCache::new(dir.path()));
        assert!(load_macro(&fetcher, false).unwrap().is_none());
    }
}
