//! Table provider trait, query builder, and structured error types.
//!
//! The TableProvider trait abstracts over table sources (the REST table store,
//! fixtures in tests) so the fetcher can be exercised without a network.

use polars::prelude::DataFrame;
use thiserror::Error;

/// Structured error types for fetch and cache operations.
///
/// These are designed to be displayable in CLI output and log lines.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by table store (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("table not found: {table}")]
    TableNotFound { table: String },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("csv I/O error: {0}")]
    CsvError(String),

    #[error("no cached data for '{key}'")]
    NoCachedData { key: String },

    #[error("data error: {0}")]
    Other(String),
}

/// A single filter or modifier in a table query.
#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryParam {
    Select(String),
    Filter { column: String, expr: String },
    Order { column: String, ascending: bool },
}

/// Query parameters for a table fetch, rendered in PostgREST syntax.
///
/// ```
/// use bdt_core::data::TableQuery;
///
/// let q = TableQuery::new()
///     .in_list("symbol", &["AAPL", "MSFT"])
///     .gte("trade_date", "2020-01-01")
///     .order("trade_date", true);
/// assert_eq!(
///     q.to_pairs(),
///     vec![
///         ("symbol".to_string(), "in.(AAPL,MSFT)".to_string()),
///         ("trade_date".to_string(), "gte.2020-01-01".to_string()),
///         ("order".to_string(), "trade_date.asc".to_string()),
///         ("select".to_string(), "*".to_string()),
///     ]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    params: Vec<QueryParam>,
}

impl TableQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the returned columns (`select=a,b,c`).
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.params.retain(|p| !matches!(p, QueryParam::Select(_)));
        self.params.push(QueryParam::Select(columns.join(",")));
        self
    }

    /// `column=eq.value`
    pub fn eq(self, column: &str, value: &str) -> Self {
        self.filter(column, format!("eq.{value}"))
    }

    /// `column=in.(v1,v2,...)`
    pub fn in_list<S: AsRef<str>>(self, column: &str, values: &[S]) -> Self {
        let joined = values
            .iter()
            .map(|v| v.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        self.filter(column, format!("in.({joined})"))
    }

    /// `column=gte.value`
    pub fn gte(self, column: &str, value: &str) -> Self {
        self.filter(column, format!("gte.{value}"))
    }

    /// `order=column.asc|desc`
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.params.push(QueryParam::Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    fn filter(mut self, column: &str, expr: String) -> Self {
        self.params.push(QueryParam::Filter {
            column: column.to_string(),
            expr,
        });
        self
    }

    /// Render as ordered `(key, value)` pairs. `select=*` is appended when no
    /// explicit select was given.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.params.len() + 1);
        let mut has_select = false;
        for p in &self.params {
            match p {
                QueryParam::Select(cols) => {
                    has_select = true;
                    pairs.push(("select".to_string(), cols.clone()));
                }
                QueryParam::Filter { column, expr } => pairs.push((column.clone(), expr.clone())),
                QueryParam::Order { column, ascending } => {
                    let dir = if *ascending { "asc" } else { "desc" };
                    pairs.push(("order".to_string(), format!("{column}.{dir}")));
                }
            }
        }
        if !has_select {
            pairs.push(("select".to_string(), "*".to_string()));
        }
        pairs
    }
}

/// Trait for table sources.
///
/// Implementations handle the specifics of fetching rows from a particular
/// store. The cache layer sits above this trait; providers know nothing about
/// the cache.
pub trait TableProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch a table, applying the query's filters and ordering.
    fn fetch_table(&self, table: &str, query: &TableQuery) -> Result<DataFrame, DataError>;

    /// Whether the provider has what it needs to make requests.
    fn is_available(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_select_is_star() {
        let pairs = TableQuery::new().to_pairs();
        assert_eq!(pairs, vec![("select".to_string(), "*".to_string())]);
    }

    #[test]
    fn explicit_select_replaces_default() {
        let pairs = TableQuery::new()
            .select(&["symbol", "trade_date"])
            .eq("symbol", "AAPL")
            .to_pairs();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "symbol,trade_date".to_string()),
                ("symbol".to_string(), "eq.AAPL".to_string()),
            ]
        );
    }

    #[test]
    fn descending_order() {
        let pairs = TableQuery::new().order("date", false).to_pairs();
        assert_eq!(pairs[0], ("order".to_string(), "date.desc".to_string()));
    }
}
