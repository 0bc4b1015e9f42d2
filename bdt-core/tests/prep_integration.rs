//! Integration tests: loaders through a fixture provider, then the full
//! clean → merge → label → split chain.

use bdt_core::data::{load_macro, load_prices, load_technicals, DataError, TableProvider};
use bdt_core::prep::schema::{date_days, date_to_days, CLOSE_FUTURE, DATE, TARGET, TICKER};
use bdt_core::prep::{
    clean, create_target_with_report, merge, temporal_split, MacroKey, MergeOptions, SplitRatios,
};
use bdt_core::{TableCache, TableFetcher, TableQuery};
use chrono::{Duration, NaiveDate};
use polars::prelude::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Serves remote-shaped tables the way the store names their columns.
struct FixtureStore {
    days: i64,
}

impl FixtureStore {
    fn start() -> NaiveDate {
        date(2024, 1, 1)
    }

    fn prices(&self) -> DataFrame {
        let mut symbols = Vec::new();
        let mut dates = Vec::new();
        let mut closes = Vec::new();
        for (k, sym) in ["AAPL", "MSFT"].iter().enumerate() {
            for i in 0..self.days {
                symbols.push(*sym);
                dates.push((Self::start() + Duration::days(i)).to_string());
                closes.push(100.0 + (k as f64) * 50.0 + ((i as f64) * 0.3).sin() * 5.0);
            }
        }
        // Duplicate the first row, as the store occasionally does.
        symbols.push(symbols[0]);
        dates.push(dates[0].clone());
        closes.push(closes[0]);

        let n = closes.len();
        df!(
            "symbol" => symbols,
            "trade_date" => dates,
            "open_price" => closes.clone(),
            "high_price" => closes.iter().map(|c| c + 1.0).collect::<Vec<_>>(),
            "low_price" => closes.iter().map(|c| c - 1.0).collect::<Vec<_>>(),
            "close_price" => closes.clone(),
            "adj_close" => closes,
            "volume" => vec![1_000_000.0; n],
        )
        .unwrap()
    }

    fn technicals(&self) -> DataFrame {
        // Only AAPL has indicators, and only for even days.
        let days: Vec<i64> = (0..self.days).step_by(2).collect();
        df!(
            "symbol" => vec!["AAPL"; days.len()],
            "date" => days.iter().map(|i| (Self::start() + Duration::days(*i)).to_string()).collect::<Vec<_>>(),
            "rsi_14" => days.iter().map(|i| 40.0 + (*i as f64 % 20.0)).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn macro_long(&self) -> DataFrame {
        df!(
            "date" => &["2024-01-01", "2024-01-15", "2024-01-01"],
            "name" => &["CPI", "CPI", "VIX"],
            "value" => &[3.1, 3.2, 13.5],
        )
        .unwrap()
    }
}

impl TableProvider for FixtureStore {
    fn name(&self) -> &str {
        "fixture"
    }

    fn fetch_table(&self, table: &str, _query: &TableQuery) -> Result<DataFrame, DataError> {
        match table {
            "prices_daily" => Ok(self.prices()),
            "technical_indicators" => Ok(self.technicals()),
            "macro_indicators" => Ok(self.macro_long()),
            other => Err(DataError::TableNotFound {
                table: other.to_string(),
            }),
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[test]
fn cpi_forward_fill_example() {
    let days: Vec<String> = (0..91)
        .map(|i| (date(2020, 1, 1) + Duration::days(i)).to_string())
        .collect();
    let prices = df!(
        "ticker" => vec!["AAPL"; days.len()],
        "date" => days.clone(),
        "close" => vec![100.0; days.len()],
    )
    .unwrap();
    let macro_long = df!(
        "date" => &["2020-01-01", "2020-03-01"],
        "name" => &["CPI", "CPI"],
        "value" => &[2.1, 2.3],
    )
    .unwrap();

    let merged = merge(
        &prices,
        None,
        Some(&macro_long),
        &MergeOptions::new(MacroKey::Name),
    )
    .unwrap();

    let cpi = merged.column("CPI").unwrap().f64().unwrap();
    let dates = date_days(&merged).unwrap();
    let mar1 = date_to_days(date(2020, 3, 1));
    for (d, v) in dates.iter().zip(cpi.into_iter()) {
        let expected = if d.unwrap() < mar1 { 2.1 } else { 2.3 };
        assert_eq!(v, Some(expected), "day {d:?}");
    }
}

#[test]
fn aapl_thirty_days_horizon_twenty() {
    let closes: Vec<f64> = (0..30).map(|i| 100.0 + 2.0 * i as f64).collect();
    let dates: Vec<String> = (0..30)
        .map(|i| (date(2024, 1, 1) + Duration::days(i)).to_string())
        .collect();
    let df = df!("ticker" => vec!["AAPL"; 30], "date" => dates, "close" => closes).unwrap();

    let (out, report) = create_target_with_report(&df, 20).unwrap();
    assert_eq!(out.height(), 10);
    assert_eq!(report.insufficient_history, 20);
    let future = out.column(CLOSE_FUTURE).unwrap().f64().unwrap();
    assert_eq!(future.get(0), Some(140.0));
    assert_eq!(future.get(9), Some(158.0));
}

#[test]
fn loaders_clean_merge_label_split() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = TableFetcher::new(FixtureStore { days: 60 }, TableCache::new(dir.path()));
    let tickers = ["AAPL", "MSFT"];

    let prices = load_prices(&fetcher, &tickers, Some(date(2024, 1, 1)), false)
        .unwrap()
        .unwrap();
    let technicals = load_technicals(&fetcher, &tickers, false).unwrap();
    let macro_long = load_macro(&fetcher, false).unwrap();

    let prices = clean(&prices).unwrap();
    assert_eq!(prices.height(), 120, "duplicate price row removed");
    let technicals = technicals.as_ref().map(clean).transpose().unwrap();
    let macro_long = macro_long.as_ref().map(clean).transpose().unwrap();

    let merged = merge(
        &prices,
        technicals.as_ref(),
        macro_long.as_ref(),
        &MergeOptions::new(MacroKey::Name),
    )
    .unwrap();
    assert_eq!(merged.height(), prices.height());
    for col in ["rsi_14", "CPI", "VIX"] {
        assert!(merged.column(col).is_ok(), "{col} missing after merge");
    }
    // MSFT has no technicals at all.
    let msft_rsi = merged
        .clone()
        .lazy()
        .filter(col(TICKER).eq(lit("MSFT")))
        .select([col("rsi_14")])
        .collect()
        .unwrap();
    assert_eq!(msft_rsi.column("rsi_14").unwrap().null_count(), 60);

    let (labeled, report) = create_target_with_report(&merged, 5).unwrap();
    assert_eq!(labeled.height(), 120 - 2 * 5);
    assert_eq!(report.invalid_price, 0);
    let targets = labeled.column(TARGET).unwrap().i32().unwrap();
    assert!(targets.into_iter().all(|t| matches!(t, Some(0) | Some(1))));

    let split = temporal_split(&labeled, SplitRatios::default()).unwrap();
    let (train, val, test) = split.sizes();
    assert_eq!(train + val + test, labeled.height());
    assert!(split.train_end < split.val_end);
    assert_eq!(split.train.column(DATE).unwrap().dtype(), &DataType::Date);

    // Everything is cached now; an offline fetcher sees the same tables.
    let offline = TableFetcher::offline(TableCache::new(dir.path()));
    let cached = load_prices(&offline, &tickers, None, false).unwrap().unwrap();
    assert_eq!(cached.height(), 121);
    assert_eq!(offline.cache().status().unwrap().len(), 3);
}
