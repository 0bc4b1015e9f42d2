//! REST table store provider.
//!
//! Talks to a PostgREST-style endpoint (`{base_url}/rest/v1/{table}`) that
//! returns a JSON array of row objects. Handles retries with exponential
//! backoff and converts the rows into a DataFrame.

use super::config::StoreConfig;
use super::provider::{DataError, TableProvider, TableQuery};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// REST table store provider.
pub struct RestTableProvider {
    client: reqwest::blocking::Client,
    config: StoreConfig,
    max_retries: u32,
    base_delay: Duration,
}

impl RestTableProvider {
    pub fn new(config: StoreConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Override the retry policy (tests use zero delay).
    pub fn with_retry(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Execute the GET with retry logic and return the decoded rows.
    fn fetch_with_retry(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>, DataError> {
        let (url, key) = match (self.config.table_url(table), self.config.api_key.as_deref()) {
            (Some(url), Some(key)) => (url, key),
            _ => {
                return Err(DataError::MissingCredentials(
                    "table store URL or API key not configured".into(),
                ))
            }
        };

        let pairs = query.to_pairs();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!(table, attempt, ?delay, "retrying table fetch");
                std::thread::sleep(delay);
            }

            let request = self
                .client
                .get(&url)
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}"))
                .query(&pairs);

            match request.send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(DataError::AuthenticationRequired(format!(
                            "HTTP {status} for table {table}"
                        )));
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(DataError::TableNotFound {
                            table: table.to_string(),
                        });
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if !status.is_success() {
                        last_error = Some(DataError::Other(format!("HTTP {status} for {table}")));
                        continue;
                    }

                    let body: Value = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!(
                            "failed to parse response for {table}: {e}"
                        ))
                    })?;

                    return match body {
                        Value::Array(rows) => Ok(rows),
                        other => Err(DataError::ResponseFormatChanged(format!(
                            "expected a JSON array of rows for {table}, got {}",
                            json_kind(&other)
                        ))),
                    };
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        warn!(table, error = %e, "table store unreachable");
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

impl TableProvider for RestTableProvider {
    fn name(&self) -> &str {
        "rest_table_store"
    }

    fn fetch_table(&self, table: &str, query: &TableQuery) -> Result<DataFrame, DataError> {
        info!(table, "fetching table from store");
        let rows = self.fetch_with_retry(table, query)?;
        let df = rows_to_frame(&rows)?;
        info!(table, rows = df.height(), columns = df.width(), "table fetched");
        Ok(df)
    }

    fn is_available(&self) -> bool {
        self.config.is_complete()
    }
}

// ── JSON rows → DataFrame ───────────────────────────────────────────

/// Inferred type of a JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Unknown,
    Number,
    Bool,
    Text,
}

impl ColumnKind {
    fn widen(self, value: &Value) -> Self {
        let seen = match value {
            Value::Null => return self,
            Value::Number(_) => ColumnKind::Number,
            Value::Bool(_) => ColumnKind::Bool,
            _ => ColumnKind::Text,
        };
        match (self, seen) {
            (ColumnKind::Unknown, k) => k,
            (a, b) if a == b => a,
            _ => ColumnKind::Text,
        }
    }
}

/// Convert an array of JSON row objects into a DataFrame.
///
/// Numbers become Float64, booleans Boolean, everything else String. Columns
/// with only nulls are String. Column order follows first appearance: the
/// first row's keys in response order, then keys first seen in later rows.
pub fn rows_to_frame(rows: &[Value]) -> Result<DataFrame, DataError> {
    let objects: Vec<&Map<String, Value>> = rows
        .iter()
        .map(|r| {
            r.as_object().ok_or_else(|| {
                DataError::ResponseFormatChanged(format!("row is a {}, not an object", json_kind(r)))
            })
        })
        .collect::<Result<_, _>>()?;

    let mut order: Vec<String> = Vec::new();
    let mut kinds: HashMap<String, ColumnKind> = HashMap::new();
    for obj in &objects {
        for (k, v) in obj.iter() {
            let kind = kinds.entry(k.clone()).or_insert_with(|| {
                order.push(k.clone());
                ColumnKind::Unknown
            });
            *kind = kind.widen(v);
        }
    }

    let mut columns = Vec::with_capacity(order.len());
    for name in &order {
        let kind = kinds.get(name).copied().unwrap_or(ColumnKind::Unknown);
        let values = objects.iter().map(|o| o.get(name).unwrap_or(&Value::Null));
        let column = match kind {
            ColumnKind::Number => {
                Column::new(name.as_str().into(), values.map(Value::as_f64).collect::<Vec<_>>())
            }
            ColumnKind::Bool => {
                Column::new(name.as_str().into(), values.map(Value::as_bool).collect::<Vec<_>>())
            }
            ColumnKind::Text | ColumnKind::Unknown => Column::new(
                name.as_str().into(),
                values.map(value_to_text).collect::<Vec<Option<String>>>(),
            ),
        };
        columns.push(column);
    }

    DataFrame::new(columns).map_err(|e| DataError::Other(format!("dataframe creation: {e}")))
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
