//! Connection settings for the remote table store.
//!
//! Loaded once at process start and injected into the REST provider; nothing
//! reads the environment after that.

use super::provider::DataError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Local env file holding store credentials, read from the working directory.
pub const ENV_FILE: &str = ".env.local";

/// Environment variables consulted for the store URL, in priority order.
pub const URL_VARS: [&str; 2] = ["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"];

/// Environment variables consulted for the API key, in priority order.
pub const KEY_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"];

/// Base URL and API key of the table store.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Never written back out; keys belong in the environment.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            api_key: Some(api_key.into()),
        }
    }

    /// Read the store settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the store settings from a dotenv-style file without touching the
    /// process environment.
    pub fn from_env_file(path: &Path) -> Result<Self, DataError> {
        let unreadable = |e: dotenv::Error| DataError::Other(format!("{}: {e}", path.display()));
        let vars = dotenv::from_path_iter(path)
            .map_err(unreadable)?
            .collect::<Result<HashMap<String, String>, _>>()
            .map_err(unreadable)?;
        Ok(Self::from_lookup(|var| vars.get(var).cloned()))
    }

    /// Layer the store settings: `self` (the config file), then `env_file`
    /// if it exists, then the process environment.
    pub fn layered(self, env_file: &Path) -> Result<Self, DataError> {
        let mut store = self;
        if env_file.is_file() {
            store = store.overridden_by(Self::from_env_file(env_file)?);
        }
        Ok(store.overridden_by(Self::from_env()))
    }

    /// Read settings through an arbitrary lookup (the environment in
    /// production, a map in tests). Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |vars: &[&str]| {
            vars.iter()
                .filter_map(|v| lookup(*v))
                .map(|s| s.trim().to_string())
                .find(|s| !s.is_empty())
        };
        Self {
            base_url: first(&URL_VARS),
            api_key: first(&KEY_VARS),
        }
    }

    /// Fill unset fields from `other` (used to layer env over file config).
    pub fn overridden_by(self, other: StoreConfig) -> Self {
        Self {
            base_url: other.base_url.or(self.base_url),
            api_key: other.api_key.or(self.api_key),
        }
    }

    /// Both URL and key are present.
    pub fn is_complete(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    /// `{base_url}/rest/v1/{table}`
    pub fn table_url(&self, table: &str) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|base| format!("{}/rest/v1/{table}", base.trim_end_matches('/')))
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
