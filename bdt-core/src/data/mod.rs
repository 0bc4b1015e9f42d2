//! Remote table access: store configuration, REST provider, on-disk cache,
//! cache-first fetcher and the per-table loaders.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod loaders;
pub mod provider;
pub mod rest;

pub use cache::{CacheFormat, CacheStatus, TableCache, TableMeta};
pub use config::{StoreConfig, ENV_FILE};
pub use fetch::TableFetcher;
pub use loaders::{load_macro, load_prices, load_technicals};
pub use provider::{DataError, TableProvider, TableQuery};
pub use rest::RestTableProvider;
