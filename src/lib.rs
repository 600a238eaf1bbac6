//! Batch loader that turns a tabular marketplace snapshot into denormalized category,
//! product and offer collections in a document store.

pub mod cli;
pub mod config;
pub mod database_ops;
pub mod logging;
pub mod models;
pub mod normalization;
pub mod report;
pub mod source;
pub mod util {
    pub mod env;
}

pub use config::{ColumnNames, LoaderConfig};
pub use database_ops::catalog::{CatalogLoader, LoadMode, LoadReport, LoadStage};
pub use database_ops::{DocumentStore, MemoryStore, SqliteStore, StoreError};
pub use normalization::{normalize, normalize_str, NormalizedPath};
pub use source::{open_path, RowSource};
