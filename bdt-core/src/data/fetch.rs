//! Cache-first table fetching.
//!
//! The fetcher owns a provider (or none, when offline) and a cache. A hit in
//! the cache is returned without touching the provider; a miss fetches and
//! writes through. `fetch` collapses every failure into `None` plus a
//! warning, which is how the pipeline detects absent sources.

use super::cache::TableCache;
use super::config::StoreConfig;
use super::provider::{DataError, TableProvider, TableQuery};
use super::rest::RestTableProvider;
use polars::prelude::DataFrame;
use tracing::{debug, info, warn};

pub struct TableFetcher {
    provider: Option<Box<dyn TableProvider>>,
    cache: TableCache,
}

impl TableFetcher {
    pub fn new(provider: impl TableProvider + 'static, cache: TableCache) -> Self {
        Self {
            provider: Some(Box::new(provider)),
            cache,
        }
    }

    /// Fetcher backed by the REST table store described by `config`.
    pub fn from_config(config: StoreConfig, cache: TableCache) -> Result<Self, DataError> {
        Ok(Self::new(RestTableProvider::new(config)?, cache))
    }

    /// Cache-only fetcher. Every miss is reported as missing credentials.
    pub fn offline(cache: TableCache) -> Self {
        Self {
            provider: None,
            cache,
        }
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    pub fn is_online(&self) -> bool {
        self.provider.as_ref().is_some_and(|p| p.is_available())
    }

    /// Fetch `table`, consulting the cache under `cache_key` first unless
    /// `force_reload` is set. Errors are logged and mapped to `None`.
    pub fn fetch(
        &self,
        table: &str,
        query: &TableQuery,
        cache_key: Option<&str>,
        force_reload: bool,
    ) -> Option<DataFrame> {
        match self.try_fetch(table, query, cache_key, force_reload) {
            Ok(df) => Some(df),
            Err(e) => {
                warn!(table, error = %e, "table unavailable");
                None
            }
        }
    }

    /// `Result` form of [`TableFetcher::fetch`].
    pub fn try_fetch(
        &self,
        table: &str,
        query: &TableQuery,
        cache_key: Option<&str>,
        force_reload: bool,
    ) -> Result<DataFrame, DataError> {
        if let (Some(key), false) = (cache_key, force_reload) {
            match self.cache.load(key) {
                Ok(df) => {
                    info!(table, key, rows = df.height(), "loaded table from cache");
                    return Ok(df);
                }
                Err(DataError::NoCachedData { .. }) => debug!(table, key, "cache miss"),
                Err(e) => warn!(table, key, error = %e, "cache read failed, fetching"),
            }
        }

        let provider = match &self.provider {
            Some(p) if p.is_available() => p,
            Some(p) => {
                return Err(DataError::MissingCredentials(format!(
                    "provider '{}' is not configured",
                    p.name()
                )))
            }
            None => {
                return Err(DataError::MissingCredentials(
                    "offline mode and no cached copy".into(),
                ))
            }
        };

        let df = provider.fetch_table(table, query)?;

        if let Some(key) = cache_key {
            if df.height() == 0 {
                debug!(table, key, "empty result not cached");
            } else if let Err(e) = self.cache.write(key, table, &df) {
                warn!(table, key, error = %e, "failed to write cache");
            }
        }
        Ok(df)
    }
}
