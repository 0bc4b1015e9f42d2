//! BDT CLI: fetch, run and cache management commands.
//!
//! Commands:
//! - `fetch`: pull the price, technical and macro tables into the cache
//! - `run`: execute the full pipeline from a TOML config file
//! - `cache status`: list cached tables with row counts and sizes

use anyhow::{bail, Context, Result};
use bdt_core::data::{
    load_macro, load_prices, load_technicals, CacheStatus, TableCache, TableFetcher, ENV_FILE,
};
use bdt_runner::{run_pipeline, PipelineConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(
    name = "bdt",
    about = "BDT CLI: forward-return classification with boosted trees and SHAP"
)]
struct Cli {
    /// Verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the price, technical and macro tables into the cache.
    Fetch {
        /// Path to a TOML config file. Defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Re-fetch even if cached.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Run the pipeline: load, prepare, train, evaluate, explain.
    Run {
        /// Path to a TOML config file. Defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Forward-return horizon in trading days (overrides the config).
        #[arg(long)]
        horizon: Option<usize>,

        /// Output directory for run artifacts (overrides the config).
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Offline mode: read tables from the cache only.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached tables, row counts and sizes.
    Status {
        /// Cache directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Fetch { config, force } => run_fetch(config.as_deref(), force),
        Commands::Run {
            config,
            horizon,
            output_dir,
            offline,
        } => run_pipeline_cmd(config.as_deref(), horizon, output_dir, offline),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
        },
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Online fetcher: config file settings, then `.env.local`, then the
/// process environment on top.
fn online_fetcher(config: &PipelineConfig) -> Result<TableFetcher> {
    let store = config
        .store
        .clone()
        .layered(Path::new(ENV_FILE))
        .with_context(|| format!("failed to read {ENV_FILE}"))?;
    if !store.is_complete() {
        bail!(
            "table store credentials missing: set SUPABASE_URL and SUPABASE_ANON_KEY \
             in the environment or {ENV_FILE} (or use --offline with a populated cache)"
        );
    }
    let cache = TableCache::new(&config.data.cache_dir);
    Ok(TableFetcher::from_config(store, cache)?)
}

fn run_fetch(config_path: Option<&Path>, force: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let fetcher = online_fetcher(&config)?;
    let tickers = config.data.tickers.as_slice();

    let prices = load_prices(&fetcher, tickers, config.data.start_date, force)?;
    let technicals = load_technicals(&fetcher, tickers, force)?;
    let macro_table = load_macro(&fetcher, force)?;

    println!("Cache: {}", config.data.cache_dir.display());
    for (name, table) in [
        ("prices", &prices),
        ("technicals", &technicals),
        ("macro", &macro_table),
    ] {
        match table {
            Some(df) => println!("  {name:<12} {:>8} rows", df.height()),
            None => println!("  {name:<12} {:>8}", "absent"),
        }
    }

    if prices.is_none() {
        bail!("price table could not be fetched");
    }
    Ok(())
}

fn run_pipeline_cmd(
    config_path: Option<&Path>,
    horizon: Option<usize>,
    output_dir: Option<PathBuf>,
    offline: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(h) = horizon {
        config.prep.horizon = h;
    }
    if let Some(dir) = output_dir {
        config.output.dir = dir;
    }
    config.validate()?;

    let fetcher = if offline {
        TableFetcher::offline(TableCache::new(&config.data.cache_dir))
    } else {
        online_fetcher(&config)?
    };

    let report = run_pipeline(&config, &fetcher)?;

    println!();
    println!("=== Pipeline Result ===");
    print!("{}", report.summary_text());

    let run_dir = config.output.dir.join(format!(
        "run_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    report
        .save_artifacts(&run_dir)
        .with_context(|| format!("failed to save artifacts to {}", run_dir.display()))?;
    info!(dir = %run_dir.display(), "artifacts saved");
    println!("Artifacts saved to: {}", run_dir.display());

    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let entries = TableCache::new(cache_dir).status()?;
    if entries.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!("Cache: {}", cache_dir.display());
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<22} {:<22} {:>10} {:>10}  {:<19}",
        "Key", "Table", "Rows", "Size", "Cached At"
    );
    println!("{}", "-".repeat(88));
    for entry in &entries {
        println!("{}", format_entry(entry));
    }

    let quarantined = entries.iter().filter(|e| e.quarantined).count();
    if quarantined > 0 {
        println!();
        println!("WARNING: {quarantined} quarantined file(s); they are refetched on next use");
    }
    Ok(())
}

fn format_entry(entry: &CacheStatus) -> String {
    let table = if entry.quarantined {
        "(quarantined)".to_string()
    } else {
        entry.table.clone().unwrap_or_else(|| "(no meta)".into())
    };
    let rows = entry
        .row_count
        .map_or_else(|| "-".to_string(), |n| n.to_string());
    let cached_at = entry.cached_at.map_or_else(
        || "-".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    format!(
        "{:<22} {:<22} {:>10} {:>10}  {:<19}",
        entry.key,
        table,
        rows,
        format_size(entry.size_bytes),
        cached_at
    )
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "bdt",
            "-v",
            "run",
            "--horizon",
            "10",
            "--output-dir",
            "out",
            "--offline",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                horizon,
                output_dir,
                offline,
                config,
            } => {
                assert_eq!(horizon, Some(10));
                assert_eq!(output_dir, Some(PathBuf::from("out")));
                assert!(offline);
                assert!(config.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn quarantined_entries_are_marked() {
        let entry = CacheStatus {
            key: "prices.parquet".into(),
            table: None,
            row_count: None,
            size_bytes: 10,
            cached_at: None,
            quarantined: true,
        };
        let line = format_entry(&entry);
        assert!(line.contains("(quarantined)"));
        assert!(line.starts_with("prices.parquet"));
    }
}
