//! Read-side aggregates computed from the store after a load, and the JSON report sink.
//!
//! Everything here queries the persisted collections, so documents rejected during the
//! write phase never show up in a report.

pub mod categories;
pub mod offers;
pub mod products;
pub mod stats;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::database_ops::store::GroupRow;

pub use categories::{CategoryAggregates, LevelStat};
pub use offers::OfferAggregates;
pub use products::ProductAggregates;
pub use stats::{StatsReport, StructureCheck};

/// Entries in "top N" lists.
pub const TOP_N: usize = 5;

/// A group count with its share of the collection total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share {
    pub key: Value,
    pub count: u64,
    pub percentage: f64,
}

impl Share {
    pub(crate) fn from_rows(rows: Vec<GroupRow>, total: u64) -> Vec<Share> {
        rows.into_iter()
            .map(|row| Share {
                percentage: percentage(row.count, total),
                key: row.key,
                count: row.count,
            })
            .collect()
    }

    /// Key rendered for log lines.
    pub fn label(&self) -> String {
        match &self.key {
            Value::String(s) => s.clone(),
            Value::Null => "<none>".to_string(),
            other => other.to_string(),
        }
    }
}

/// `part / total * 100`, or 0 for an empty total.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Write `report` as pretty JSON, creating parent directories.
pub fn write_json_report<T: Serialize + ?Sized>(path: &Path, report: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(path, body).with_context(|| format!("failed to write report {}", path.display()))?;
    info!(target: "report", path = %path.display(), "report written");
    Ok(())
}

pub(crate) fn log_shares(heading: &str, shares: &[Share]) {
    for (rank, share) in shares.iter().enumerate() {
        info!(
            target: "report",
            section = heading,
            rank = rank + 1,
            key = %share.label(),
            count = share.count,
            pct = %format!("{:.3}", share.percentage),
            "group share"
        );
    }
}
