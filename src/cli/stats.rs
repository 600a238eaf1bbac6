use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::config::{self, LoaderConfig};
use crate::database_ops::SqliteStore;
use crate::report::{self, StatsReport};
use crate::util::env as env_util;

#[derive(Debug, Clone, Default)]
pub struct StatsConfig {
    /// SQLite store path; falls back to `CATALOG_STORE`.
    pub store: Option<PathBuf>,
    /// Writes `stats_report.json` here when set (or `CATALOG_REPORT_DIR`).
    pub report_dir: Option<PathBuf>,
}

pub fn run(cfg: StatsConfig) -> Result<StatsReport> {
    env_util::init_env();
    let store_path = cfg.store.clone().unwrap_or_else(config::default_store_path);
    if !store_path.exists() {
        bail!("document store {} does not exist; run a load first", store_path.display());
    }
    let store = SqliteStore::open(&store_path)
        .with_context(|| format!("cannot open document store {}", store_path.display()))?;
    let stats = report::stats::collect(&store).context("failed to collect store statistics")?;
    stats.log_summary();

    if let Some(dir) = cfg.report_dir.or_else(|| LoaderConfig::from_env().report_dir) {
        report::write_json_report(&dir.join("stats_report.json"), &stats)?;
    }
    Ok(stats)
}
