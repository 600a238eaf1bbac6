use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::{self, LoaderConfig};
use crate::database_ops::catalog::{CatalogLoader, LoadMode, LoadReport};
use crate::database_ops::{DocumentStore, MemoryStore, SqliteStore};
use crate::source::{self, RowSource};
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct LoadConfig {
    /// Snapshot file; falls back to `CATALOG_SOURCE`.
    pub source: Option<PathBuf>,
    /// SQLite store path; falls back to `CATALOG_STORE`.
    pub store: Option<PathBuf>,
    /// Report directory; falls back to `CATALOG_REPORT_DIR`.
    pub report_dir: Option<PathBuf>,
    /// Load into an in-memory store and discard it afterwards. `CATALOG_DRY_RUN` also
    /// enables it.
    pub dry_run: bool,
    /// Modes to run, in order.
    pub modes: Vec<LoadMode>,
    /// Batch size override applied to every selected mode.
    pub batch_size: Option<usize>,
}

pub fn run(cfg: LoadConfig) -> Result<Vec<LoadReport>> {
    env_util::init_env();
    env_util::log_snapshot(
        "load",
        &[
            "CATALOG_SOURCE",
            "CATALOG_STORE",
            "CATALOG_REPORT_DIR",
            "CATEGORY_BATCH_SIZE",
            "PRODUCT_BATCH_SIZE",
            "OFFER_BATCH_SIZE",
            "CATALOG_DRY_RUN",
        ],
    );
    if cfg.modes.is_empty() {
        bail!("no load mode selected");
    }

    let source_path = match cfg.source.clone().or_else(config::source_from_env) {
        Some(path) => path,
        None => bail!("no source snapshot: pass --source or set CATALOG_SOURCE"),
    };
    let source = source::open_path(&source_path)
        .with_context(|| format!("cannot use source {}", source_path.display()))?;

    let mut loader_cfg = LoaderConfig::from_env();
    if let Some(dir) = cfg.report_dir.clone() {
        loader_cfg.report_dir = Some(dir);
    }
    if let Some(size) = cfg.batch_size {
        let size = size.max(1);
        for mode in &cfg.modes {
            match mode {
                LoadMode::Categories => loader_cfg.category_batch_size = size,
                LoadMode::Products => loader_cfg.product_batch_size = size,
                LoadMode::Offers => loader_cfg.offer_batch_size = size,
            }
        }
    }

    if cfg.dry_run || env_util::env_flag("CATALOG_DRY_RUN", false) {
        info!(target: "cli", "dry run: loading into an in-memory store");
        run_modes(loader_cfg, MemoryStore::new(), &cfg.modes, source.as_ref())
    } else {
        let store_path = cfg.store.clone().unwrap_or_else(config::default_store_path);
        let store = SqliteStore::open(&store_path)
            .with_context(|| format!("cannot open document store {}", store_path.display()))?;
        run_modes(loader_cfg, store, &cfg.modes, source.as_ref())
    }
}

fn run_modes<S: DocumentStore>(
    loader_cfg: LoaderConfig,
    store: S,
    modes: &[LoadMode],
    source: &dyn RowSource,
) -> Result<Vec<LoadReport>> {
    let mut loader = CatalogLoader::new(loader_cfg, store);
    let mut reports = Vec::with_capacity(modes.len());
    for &mode in modes {
        let report = loader
            .load(mode, source)
            .with_context(|| format!("{mode} load failed at stage {}", loader.stage()))?;
        reports.push(report);
    }
    Ok(reports)
}
