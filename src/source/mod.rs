//! Row sources: lazy, finite, re-openable streams of tabular rows.
//!
//! A row is an ordered mapping from column name to a JSON value. Opening a source is
//! where connection-level problems surface (missing file, unreadable header); problems
//! with a single row surface as an `Err` item in the stream and are skipped by callers.

mod csv_source;
mod memory_source;
mod ndjson_source;
mod parquet_source;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

pub use csv_source::CsvSource;
pub use memory_source::VecSource;
pub use ndjson_source::NdjsonSource;
pub use parquet_source::ParquetSource;

pub type Row = IndexMap<String, Value>;

pub type RowStream = Box<dyn Iterator<Item = Result<Row, SourceError>>>;

/// Which columns a reader should materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

impl Projection {
    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Columns(names.into_iter().map(Into::into).collect())
    }

    /// Restrict a fully decoded row to the projection. Requested columns absent from the
    /// row become `Null`.
    pub fn apply(&self, mut row: Row) -> Row {
        match self {
            Projection::All => row,
            Projection::Columns(cols) => cols
                .iter()
                .map(|c| (c.clone(), row.swap_remove(c).unwrap_or(Value::Null)))
                .collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("cannot open source {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("source {path} has no column '{column}'")]
    MissingColumn { path: String, column: String },
    #[error("unsupported source format for {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("row {row}: {reason}")]
    Row { row: u64, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Row-level problems are skipped; everything else stops the run.
    pub fn is_row_level(&self) -> bool {
        matches!(self, SourceError::Row { .. })
    }
}

pub trait RowSource {
    /// Name used in logs and reports (usually the file name).
    fn name(&self) -> String;

    /// Open a fresh stream from the first row. May be called repeatedly.
    fn open(&self, projection: &Projection) -> Result<RowStream, SourceError>;

    /// Row count known without reading the data, if the format records one.
    fn row_count_hint(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Parquet,
    Ndjson,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" => Some(SourceFormat::Csv),
            "pq" | "parquet" => Some(SourceFormat::Parquet),
            "ndjson" | "jsonl" => Some(SourceFormat::Ndjson),
            _ => None,
        }
    }
}

/// Pick a reader from the file extension. The file must exist.
pub fn open_path(path: impl AsRef<Path>) -> Result<Box<dyn RowSource>, SourceError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SourceError::NotFound(path.to_path_buf()));
    }
    match SourceFormat::from_path(path) {
        Some(SourceFormat::Csv) => Ok(Box::new(CsvSource::new(path))),
        Some(SourceFormat::Parquet) => Ok(Box::new(ParquetSource::new(path))),
        Some(SourceFormat::Ndjson) => Ok(Box::new(NdjsonSource::new(path))),
        None => Err(SourceError::UnsupportedFormat(path.to_path_buf())),
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
