//! Loader configuration resolved from the environment (`.env` supported) with CLI
//! overrides applied on top by the binary.

use std::path::PathBuf;

use serde::Serialize;

use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_CATEGORY_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_PRODUCT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_OFFER_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Source column names for the fields the loader reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnNames {
    pub partner: String,
    pub category_id: String,
    pub category_path: String,
    pub offer_id: String,
    pub offer_name: String,
    pub offer_type: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            partner: "Partner_Name".to_string(),
            category_id: "Category_ID".to_string(),
            category_path: "Category_FullPathName".to_string(),
            offer_id: "Offer_ID".to_string(),
            offer_name: "Offer_Name".to_string(),
            offer_type: "Offer_Type".to_string(),
        }
    }
}

impl ColumnNames {
    /// Defaults overridden by `COLUMN_PARTNER`, `COLUMN_CATEGORY_ID`, `COLUMN_CATEGORY_PATH`,
    /// `COLUMN_OFFER_ID`, `COLUMN_OFFER_NAME` and `COLUMN_OFFER_TYPE`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            partner: env_opt("COLUMN_PARTNER").unwrap_or(d.partner),
            category_id: env_opt("COLUMN_CATEGORY_ID").unwrap_or(d.category_id),
            category_path: env_opt("COLUMN_CATEGORY_PATH").unwrap_or(d.category_path),
            offer_id: env_opt("COLUMN_OFFER_ID").unwrap_or(d.offer_id),
            offer_name: env_opt("COLUMN_OFFER_NAME").unwrap_or(d.offer_name),
            offer_type: env_opt("COLUMN_OFFER_TYPE").unwrap_or(d.offer_type),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoaderConfig {
    pub category_batch_size: usize,
    pub product_batch_size: usize,
    pub offer_batch_size: usize,
    /// Log a progress line every N rows.
    pub progress_interval: u64,
    pub columns: ColumnNames,
    /// Where JSON reports go; `None` disables report files.
    pub report_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            category_batch_size: DEFAULT_CATEGORY_BATCH_SIZE,
            product_batch_size: DEFAULT_PRODUCT_BATCH_SIZE,
            offer_batch_size: DEFAULT_OFFER_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            columns: ColumnNames::default(),
            report_dir: None,
        }
    }
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        Self {
            category_batch_size: env_parse("CATEGORY_BATCH_SIZE", DEFAULT_CATEGORY_BATCH_SIZE).max(1),
            product_batch_size: env_parse("PRODUCT_BATCH_SIZE", DEFAULT_PRODUCT_BATCH_SIZE).max(1),
            offer_batch_size: env_parse("OFFER_BATCH_SIZE", DEFAULT_OFFER_BATCH_SIZE).max(1),
            progress_interval: env_parse("PROGRESS_INTERVAL", DEFAULT_PROGRESS_INTERVAL).max(1),
            columns: ColumnNames::from_env(),
            report_dir: env_opt("CATALOG_REPORT_DIR").map(PathBuf::from),
        }
    }
}

/// Default document store path when neither `--store` nor `CATALOG_STORE` is set.
pub fn default_store_path() -> PathBuf {
    env_opt("CATALOG_STORE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("catalog.sqlite3"))
}

/// Source snapshot from `CATALOG_SOURCE`, if configured.
pub fn source_from_env() -> Option<PathBuf> {
    env_opt("CATALOG_SOURCE").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_batch_sizes() {
        let cfg = LoaderConfig::default();
        assert_eq!(cfg.category_batch_size, 1000);
        assert_eq!(cfg.product_batch_size, 10_000);
        assert_eq!(cfg.columns.category_path, "Category_FullPathName");
        assert!(cfg.report_dir.is_none());
    }
}
