use std::path::PathBuf;

use anyhow::Result;
use catalog_loader::cli::load::{run as run_load, LoadConfig};
use catalog_loader::cli::stats::{run as run_stats, StatsConfig};
use catalog_loader::database_ops::catalog::LoadMode;
use catalog_loader::logging::{init_tracing, DEFAULT_FILTER};
use catalog_loader::util::env;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "catalog-loader",
    version,
    about = "Load a marketplace snapshot into category, product and offer collections"
)]
struct Cli {
    /// Snapshot file (.csv, .tsv, .pq/.parquet, .ndjson/.jsonl); defaults to CATALOG_SOURCE
    #[arg(long, global = true)]
    source: Option<PathBuf>,
    /// SQLite document store path; defaults to CATALOG_STORE or ./catalog.sqlite3
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Directory for JSON reports; defaults to CATALOG_REPORT_DIR (no reports when unset)
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,
    /// Load into an in-memory store instead of the SQLite file
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
    /// Debug-level loader logs (ignored when RUST_LOG is set)
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Rebuild the categories collection (one document per partner/category/path group)
    Categories {
        /// Documents per insert batch (default: CATEGORY_BATCH_SIZE or 1000)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Rebuild the products collection (one denormalized document per row)
    Products {
        /// Documents per insert batch (default: PRODUCT_BATCH_SIZE or 10000)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Rebuild the flat offers collection
    Offers {
        /// Documents per insert batch (default: OFFER_BATCH_SIZE or 10000)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Rebuild categories, products and offers in sequence
    All,
    /// Print statistics for an existing store without loading
    Stats,
}

fn main() -> Result<()> {
    env::init_env();
    let cli = Cli::parse();
    init_tracing(DEFAULT_FILTER, cli.verbose)?;

    let (modes, batch_size) = match cli.command {
        Commands::Stats => {
            run_stats(StatsConfig {
                store: cli.store,
                report_dir: cli.report_dir,
            })?;
            return Ok(());
        }
        Commands::Categories { batch_size } => (vec![LoadMode::Categories], batch_size),
        Commands::Products { batch_size } => (vec![LoadMode::Products], batch_size),
        Commands::Offers { batch_size } => (vec![LoadMode::Offers], batch_size),
        Commands::All => (LoadMode::ALL.to_vec(), None),
    };

    let reports = run_load(LoadConfig {
        source: cli.source,
        store: cli.store,
        report_dir: cli.report_dir,
        dry_run: cli.dry_run,
        modes,
        batch_size,
    })?;
    for report in &reports {
        info!(
            mode = %report.mode,
            inserted = report.stats.writes.inserted,
            failed = report.stats.writes.failed,
            skipped = report.stats.skipped_total(),
            "load complete"
        );
    }
    Ok(())
}
