//! On-disk table cache.
//!
//! Layout: `{cache_dir}/{key}` with a sidecar `{cache_dir}/{key}.meta.json`.
//! Keys ending in `.parquet` are stored as Parquet, anything else as CSV.
//!
//! Features:
//! - Atomic writes (write to `{key}.tmp`, rename into place)
//! - Integrity check on load (readable file, hash matches the sidecar)
//! - Quarantine for corrupt files (`{key}.quarantined`), treated as a miss
//! - Metadata sidecar per table (table name, row count, BLAKE3 hash, time)

use super::provider::DataError;
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const META_SUFFIX: &str = ".meta.json";
const TMP_SUFFIX: &str = ".tmp";
const QUARANTINE_SUFFIX: &str = ".quarantined";

/// File format of a cache entry, chosen from the key's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFormat {
    Parquet,
    Csv,
}

impl CacheFormat {
    pub fn for_key(key: &str) -> Self {
        let is_parquet = Path::new(key)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));
        if is_parquet {
            CacheFormat::Parquet
        } else {
            CacheFormat::Csv
        }
    }
}

/// Metadata sidecar for a cached table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub table: String,
    pub format: CacheFormat,
    pub row_count: usize,
    pub column_count: usize,
    pub data_hash: String,
    pub cached_at: NaiveDateTime,
}

/// One line of `TableCache::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub key: String,
    pub table: Option<String>,
    pub row_count: Option<usize>,
    pub size_bytes: u64,
    pub cached_at: Option<NaiveDateTime>,
    pub quarantined: bool,
}

/// File-per-table cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct TableCache {
    cache_dir: PathBuf,
}

impl TableCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, DataError> {
        validate_key(key)?;
        Ok(self.cache_dir.join(key))
    }

    fn sibling(&self, key: &str, suffix: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}{suffix}"))
    }

    /// Whether a data file exists for `key`. Says nothing about validity.
    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Write `df` under `key`, replacing any previous entry.
    pub fn write(&self, key: &str, table: &str, df: &DataFrame) -> Result<TableMeta, DataError> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let format = CacheFormat::for_key(key);
        let tmp_path = self.sibling(key, TMP_SUFFIX);
        let written = match format {
            CacheFormat::Parquet => write_parquet(df, &tmp_path),
            CacheFormat::Csv => write_csv(df, &tmp_path),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;

        let meta = TableMeta {
            table: table.to_string(),
            format,
            row_count: df.height(),
            column_count: df.width(),
            data_hash: hash_file(&path)?,
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.sibling(key, META_SUFFIX), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        debug!(key, table, rows = meta.row_count, "cached table");
        Ok(meta)
    }

    /// Load the table stored under `key`.
    ///
    /// A missing entry is `NoCachedData`. An unreadable entry, or one whose
    /// hash disagrees with its sidecar, is quarantined and also reported as
    /// `NoCachedData`, so callers fall through to a fresh fetch.
    pub fn load(&self, key: &str) -> Result<DataFrame, DataError> {
        let path = self.entry_path(key)?;
        if !path.is_file() {
            return Err(DataError::NoCachedData {
                key: key.to_string(),
            });
        }

        match self.load_and_validate(key, &path) {
            Ok(df) => Ok(df),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "quarantining corrupt cache file");
                let _ = fs::rename(&path, self.sibling(key, QUARANTINE_SUFFIX));
                let _ = fs::remove_file(self.sibling(key, META_SUFFIX));
                Err(DataError::NoCachedData {
                    key: key.to_string(),
                })
            }
        }
    }

    fn load_and_validate(&self, key: &str, path: &Path) -> Result<DataFrame, DataError> {
        if let Some(meta) = self.get_meta(key) {
            let actual = hash_file(path)?;
            if actual != meta.data_hash {
                return Err(DataError::ValidationError(format!(
                    "hash mismatch for '{key}'"
                )));
            }
        }
        match CacheFormat::for_key(key) {
            CacheFormat::Parquet => read_parquet(path),
            CacheFormat::Csv => read_csv(path),
        }
    }

    /// Sidecar metadata for `key`, if present and parseable.
    pub fn get_meta(&self, key: &str) -> Option<TableMeta> {
        validate_key(key).ok()?;
        let content = fs::read_to_string(self.sibling(key, META_SUFFIX)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Delete the entry and its sidecar. Missing files are not an error.
    pub fn remove(&self, key: &str) -> Result<(), DataError> {
        let path = self.entry_path(key)?;
        for p in [path, self.sibling(key, META_SUFFIX)] {
            match fs::remove_file(&p) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DataError::CacheError(format!(
                        "remove {}: {e}",
                        p.display()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Every data file and quarantined file in the cache, sorted by key.
    pub fn status(&self) -> Result<Vec<CacheStatus>, DataError> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DataError::CacheError(format!("read dir: {e}"))),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(META_SUFFIX) || name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);

            if let Some(key) = name.strip_suffix(QUARANTINE_SUFFIX) {
                out.push(CacheStatus {
                    key: key.to_string(),
                    table: None,
                    row_count: None,
                    size_bytes,
                    cached_at: None,
                    quarantined: true,
                });
                continue;
            }

            let meta = self.get_meta(name);
            out.push(CacheStatus {
                key: name.to_string(),
                table: meta.as_ref().map(|m| m.table.clone()),
                row_count: meta.as_ref().map(|m| m.row_count),
                size_bytes,
                cached_at: meta.as_ref().map(|m| m.cached_at),
                quarantined: false,
            });
        }

        out.sort_by(|a, b| a.key.cmp(&b.key).then(a.quarantined.cmp(&b.quarantined)));
        Ok(out)
    }
}

/// Keys are plain file names inside the cache directory.
fn validate_key(key: &str) -> Result<(), DataError> {
    let plain = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains('/')
        && !key.contains('\\');
    if plain {
        Ok(())
    } else {
        Err(DataError::ValidationError(format!(
            "cache key must be a plain file name, got '{key}'"
        )))
    }
}

fn hash_file(path: &Path) -> Result<String, DataError> {
    let bytes =
        fs::read(path).map_err(|e| DataError::CacheError(format!("read for hash: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// ── File I/O helpers ────────────────────────────────────────────────

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))
}

fn write_csv(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let mut file =
        fs::File::create(path).map_err(|e| DataError::CsvError(format!("create file: {e}")))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df.clone())
        .map_err(|e| DataError::CsvError(format!("write csv: {e}")))?;
    Ok(())
}

fn read_csv(path: &Path) -> Result<DataFrame, DataError> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| DataError::CsvError(format!("read csv: {e}")))
}
