//! Drop-and-rebuild catalog loads.
//!
//! A load walks `Idle -> Connecting -> Reading -> Transforming -> Writing -> Indexing ->
//! Aggregating -> Reporting -> Done`. Product and offer loads loop over
//! Reading/Transforming/Writing once per batch; category loads must read everything
//! before the first write. Connection-level failures abort the load. Bad rows and
//! rejected documents are counted and the load carries on.
//!
//! A load owns its target collection for the whole run: two loads against the same
//! collection at once are not supported.

mod batch;
mod categories;
mod offers;
mod products;
mod progress;
mod row;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::database_ops::store::{Document, DocumentStore, IndexSpec, StoreError};
use crate::models::{CATEGORIES_COLLECTION, OFFERS_COLLECTION, PRODUCTS_COLLECTION};
use crate::report::{self, CategoryAggregates, OfferAggregates, ProductAggregates};
use crate::source::{Projection, RowSource, RowStream, SourceError};

pub use batch::{write_batch, BatchOutcome, WriteSummary, MAX_FAILURE_SAMPLES};
pub use progress::StageTiming;
pub use row::SkipReason;

use categories::CategoryAggregator;
use progress::{Progress, StageClock};
use row::CatalogRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// One document per (partner, category id, path) group with a product count.
    Categories,
    /// One denormalized product per row with breadcrumbs.
    Products,
    /// One flat offer snapshot per row keyed by the raw offer id.
    Offers,
}

impl LoadMode {
    pub const ALL: [LoadMode; 3] = [LoadMode::Categories, LoadMode::Products, LoadMode::Offers];

    pub fn as_str(self) -> &'static str {
        match self {
            LoadMode::Categories => "categories",
            LoadMode::Products => "products",
            LoadMode::Offers => "offers",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            LoadMode::Categories => CATEGORIES_COLLECTION,
            LoadMode::Products => PRODUCTS_COLLECTION,
            LoadMode::Offers => OFFERS_COLLECTION,
        }
    }

    pub fn report_file_name(self) -> &'static str {
        match self {
            LoadMode::Categories => "categories_report.json",
            LoadMode::Products => "products_report.json",
            LoadMode::Offers => "offers_report.json",
        }
    }

    pub fn batch_size(self, config: &LoaderConfig) -> usize {
        let size = match self {
            LoadMode::Categories => config.category_batch_size,
            LoadMode::Products => config.product_batch_size,
            LoadMode::Offers => config.offer_batch_size,
        };
        size.max(1)
    }

    /// Secondary indexes built after the write phase.
    pub fn indexes(self) -> Vec<IndexSpec> {
        match self {
            LoadMode::Categories => categories::indexes(),
            LoadMode::Products => products::indexes(),
            LoadMode::Offers => offers::indexes(),
        }
    }

    fn projection(self, config: &LoaderConfig) -> Projection {
        let c = &config.columns;
        match self {
            LoadMode::Categories => Projection::columns([
                c.partner.as_str(),
                c.category_id.as_str(),
                c.category_path.as_str(),
                c.offer_id.as_str(),
            ]),
            LoadMode::Products | LoadMode::Offers => Projection::All,
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    Idle,
    Connecting,
    Reading,
    Transforming,
    Writing,
    Indexing,
    Aggregating,
    Reporting,
    Done,
}

impl LoadStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStage::Idle => "idle",
            LoadStage::Connecting => "connecting",
            LoadStage::Reading => "reading",
            LoadStage::Transforming => "transforming",
            LoadStage::Writing => "writing",
            LoadStage::Indexing => "indexing",
            LoadStage::Aggregating => "aggregating",
            LoadStage::Reporting => "reporting",
            LoadStage::Done => "done",
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of building one secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub name: String,
    pub field: String,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub rows_read: u64,
    pub rows_valid: u64,
    pub skipped_rows: BTreeMap<SkipReason, u64>,
    pub documents_built: u64,
    pub writes: WriteSummary,
}

impl LoadStats {
    fn skip(&mut self, reason: SkipReason) {
        *self.skipped_rows.entry(reason).or_insert(0) += 1;
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped_rows.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Aggregates {
    Categories(CategoryAggregates),
    Products(ProductAggregates),
    Offers(OfferAggregates),
}

impl Aggregates {
    fn collect<S: DocumentStore + ?Sized>(mode: LoadMode, store: &S) -> Result<Self, StoreError> {
        match mode {
            LoadMode::Categories => report::categories::collect(store).map(Aggregates::Categories),
            LoadMode::Products => report::products::collect(store).map(Aggregates::Products),
            LoadMode::Offers => report::offers::collect(store).map(Aggregates::Offers),
        }
    }

    pub fn log_summary(&self) {
        match self {
            Aggregates::Categories(a) => a.log_summary(),
            Aggregates::Products(a) => a.log_summary(),
            Aggregates::Offers(a) => a.log_summary(),
        }
    }
}

/// Everything known about one finished load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub mode: LoadMode,
    pub collection: String,
    pub source_file: String,
    pub store: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub load_time_seconds: f64,
    pub rows_per_second: f64,
    pub stats: LoadStats,
    pub indexes: Vec<IndexOutcome>,
    /// `None` when the aggregation queries failed; see `aggregation_error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Aggregates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_error: Option<String>,
    pub stage_timings: Vec<StageTiming>,
}

impl LoadReport {
    pub fn failed_indexes(&self) -> impl Iterator<Item = &IndexOutcome> {
        self.indexes.iter().filter(|i| !i.created)
    }
}

/// Runs loads against an injected document store.
pub struct CatalogLoader<S: DocumentStore> {
    config: LoaderConfig,
    store: S,
    stage: LoadStage,
}

impl<S: DocumentStore> CatalogLoader<S> {
    pub fn new(config: LoaderConfig, store: S) -> Self {
        Self {
            config,
            store,
            stage: LoadStage::Idle,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Stage the last load reached (`Done` after success).
    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    fn enter(&mut self, mode: LoadMode, next: LoadStage) {
        let prev = self.stage;
        self.stage = next;
        if next > prev {
            info!(target: "loader", mode = %mode, from = %prev, to = %next, "stage");
        } else {
            // per-batch loop back to reading
            debug!(target: "loader", mode = %mode, from = %prev, to = %next, "stage");
        }
    }

    /// Replace `mode`'s collection with documents built from `source`.
    pub fn load(&mut self, mode: LoadMode, source: &dyn RowSource) -> Result<LoadReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let mut clock = StageClock::default();
        let mut stats = LoadStats::default();
        let collection = mode.collection();
        self.stage = LoadStage::Idle;
        info!(
            target: "loader",
            mode = %mode,
            source = %source.name(),
            store = %self.store.describe(),
            batch_size = mode.batch_size(&self.config),
            "load starting"
        );

        self.enter(mode, LoadStage::Connecting);
        let t = Instant::now();
        self.store
            .ping()
            .with_context(|| format!("document store {} is not reachable", self.store.describe()))?;
        let stream = source
            .open(&mode.projection(&self.config))
            .with_context(|| format!("failed to open source {}", source.name()))?;
        self.store
            .drop_collection(collection)
            .with_context(|| format!("failed to drop collection {collection}"))?;
        clock.record(LoadStage::Connecting.as_str(), t.elapsed(), true);

        let total_rows = source.row_count_hint();
        match mode {
            LoadMode::Categories => self.load_categories(stream, total_rows, &mut stats, &mut clock)?,
            LoadMode::Products | LoadMode::Offers => {
                self.load_streaming(mode, stream, total_rows, &mut stats, &mut clock)?
            }
        }

        self.enter(mode, LoadStage::Indexing);
        let t = Instant::now();
        let indexes = self.build_indexes(mode)?;
        clock.record(LoadStage::Indexing.as_str(), t.elapsed(), indexes.iter().all(|i| i.created));

        self.enter(mode, LoadStage::Aggregating);
        let t = Instant::now();
        let (aggregates, aggregation_error) = match Aggregates::collect(mode, &self.store) {
            Ok(aggregates) => (Some(aggregates), None),
            Err(err) if err.is_fatal() => {
                return Err(err).with_context(|| format!("failed to aggregate {mode}"))
            }
            Err(err) => {
                warn!(target: "loader", mode = %mode, error = %err, "aggregation failed; report has no aggregates");
                (None, Some(err.to_string()))
            }
        };
        clock.record(LoadStage::Aggregating.as_str(), t.elapsed(), aggregation_error.is_none());

        self.enter(mode, LoadStage::Reporting);
        let t = Instant::now();
        let elapsed = started.elapsed().as_secs_f64();
        let report = LoadReport {
            mode,
            collection: collection.to_string(),
            source_file: source.name(),
            store: self.store.describe(),
            started_at,
            finished_at: Utc::now(),
            load_time_seconds: elapsed,
            rows_per_second: if elapsed > 0.0 { stats.rows_read as f64 / elapsed } else { 0.0 },
            stats,
            indexes,
            aggregates,
            aggregation_error,
            stage_timings: Vec::new(),
        };
        log_report(&report);
        if let Some(dir) = &self.config.report_dir {
            report::write_json_report(&dir.join(mode.report_file_name()), &report)?;
        }
        clock.record(LoadStage::Reporting.as_str(), t.elapsed(), true);
        clock.emit_summary();

        self.enter(mode, LoadStage::Done);
        Ok(LoadReport {
            stage_timings: clock.timings().to_vec(),
            ..report
        })
    }

    fn load_categories(
        &mut self,
        stream: RowStream,
        total_rows: Option<u64>,
        stats: &mut LoadStats,
        clock: &mut StageClock,
    ) -> Result<()> {
        let mode = LoadMode::Categories;
        self.enter(mode, LoadStage::Reading);
        let t = Instant::now();
        let mut aggregator = CategoryAggregator::default();
        let mut progress = Progress::new("category rows", total_rows, self.config.progress_interval);
        for item in stream {
            progress.tick(1);
            if let Some(row) = self.accept_row(item, false, stats)? {
                aggregator.add(row);
            }
        }
        progress.finish();
        clock.record(LoadStage::Reading.as_str(), t.elapsed(), true);
        info!(
            target: "loader",
            rows = stats.rows_read,
            valid = stats.rows_valid,
            skipped = stats.skipped_total(),
            groups = aggregator.group_count(),
            "category rows grouped"
        );

        self.enter(mode, LoadStage::Transforming);
        let t = Instant::now();
        let docs = aggregator
            .into_categories(Utc::now())
            .into_values()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Document>, _>>()
            .context("failed to serialize category documents")?;
        stats.documents_built = docs.len() as u64;
        clock.record(LoadStage::Transforming.as_str(), t.elapsed(), true);

        self.enter(mode, LoadStage::Writing);
        let t = Instant::now();
        for batch in docs.chunks(mode.batch_size(&self.config)) {
            self.write(mode, batch, stats)?;
        }
        clock.record(LoadStage::Writing.as_str(), t.elapsed(), true);
        Ok(())
    }

    fn load_streaming(
        &mut self,
        mode: LoadMode,
        stream: RowStream,
        total_rows: Option<u64>,
        stats: &mut LoadStats,
        clock: &mut StageClock,
    ) -> Result<()> {
        let build: fn(&CatalogRow, DateTime<Utc>) -> serde_json::Result<Option<Value>> = match mode {
            LoadMode::Offers => |row: &CatalogRow, now: DateTime<Utc>| {
                offers::offer_from_row(row, now).map(serde_json::to_value).transpose()
            },
            _ => |row: &CatalogRow, now: DateTime<Utc>| {
                products::product_from_row(row, now).map(serde_json::to_value).transpose()
            },
        };
        let now = Utc::now();
        let batch_size = mode.batch_size(&self.config);
        let mut progress = Progress::new(format!("{mode} rows"), total_rows, self.config.progress_interval);

        let chunks = stream.chunks(batch_size);
        for chunk in &chunks {
            self.enter(mode, LoadStage::Reading);
            let t = Instant::now();
            let items: Vec<Result<_, SourceError>> = chunk.collect();
            progress.tick(items.len() as u64);
            clock.record(LoadStage::Reading.as_str(), t.elapsed(), true);

            self.enter(mode, LoadStage::Transforming);
            let t = Instant::now();
            let mut docs = Vec::with_capacity(items.len());
            for item in items {
                let Some(row) = self.accept_row(item, true, stats)? else {
                    continue;
                };
                match build(&row, now).with_context(|| format!("failed to serialize {mode} document"))? {
                    Some(doc) => docs.push(doc),
                    None => stats.skip(SkipReason::MissingOfferId),
                }
            }
            stats.documents_built += docs.len() as u64;
            clock.record(LoadStage::Transforming.as_str(), t.elapsed(), true);

            self.enter(mode, LoadStage::Writing);
            let t = Instant::now();
            self.write(mode, &docs, stats)?;
            clock.record(LoadStage::Writing.as_str(), t.elapsed(), true);
        }
        progress.finish();
        Ok(())
    }

    /// Count a row and validate it. `Ok(None)` means skipped; `Err` means the source
    /// itself failed mid-stream.
    fn accept_row(
        &self,
        item: Result<crate::source::Row, SourceError>,
        need_offer_id: bool,
        stats: &mut LoadStats,
    ) -> Result<Option<CatalogRow>> {
        stats.rows_read += 1;
        let row = match item {
            Ok(row) => row,
            Err(err) if err.is_row_level() => {
                debug!(target: "loader", error = %err, "skipping unreadable row");
                stats.skip(SkipReason::MalformedRow);
                return Ok(None);
            }
            Err(err) => return Err(err).context("source failed while streaming rows"),
        };
        match CatalogRow::parse(&row, &self.config.columns, need_offer_id) {
            Ok(parsed) => {
                stats.rows_valid += 1;
                Ok(Some(parsed))
            }
            Err(reason) => {
                stats.skip(reason);
                Ok(None)
            }
        }
    }

    fn write(&mut self, mode: LoadMode, docs: &[Document], stats: &mut LoadStats) -> Result<()> {
        let collection = mode.collection();
        let outcome = write_batch(&mut self.store, collection, docs)
            .with_context(|| format!("batch write to {collection} failed"))?;
        if !outcome.failed.is_empty() {
            warn!(
                target: "loader",
                collection,
                inserted = outcome.inserted,
                failed = outcome.failed.len(),
                "batch finished with rejected documents"
            );
        }
        stats.writes.absorb(outcome);
        debug!(
            target: "loader",
            collection,
            inserted_total = stats.writes.inserted,
            failed_total = stats.writes.failed,
            "batch written"
        );
        Ok(())
    }

    fn build_indexes(&mut self, mode: LoadMode) -> Result<Vec<IndexOutcome>> {
        let collection = mode.collection();
        let mut outcomes = Vec::new();
        for spec in mode.indexes() {
            let outcome = match self.store.create_index(collection, &spec) {
                Ok(()) => {
                    info!(target: "loader", collection, index = %spec.name, field = %spec.field, "index created");
                    IndexOutcome {
                        name: spec.name,
                        field: spec.field,
                        created: true,
                        error: None,
                    }
                }
                Err(err) if err.is_fatal() => {
                    return Err(err).with_context(|| format!("failed to build index {}", spec.name))
                }
                Err(err) => {
                    warn!(target: "loader", collection, index = %spec.name, error = %err, "index creation failed");
                    IndexOutcome {
                        name: spec.name,
                        field: spec.field,
                        created: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

fn log_report(report: &LoadReport) {
    let stats = &report.stats;
    info!(
        target: "loader",
        mode = %report.mode,
        source = %report.source_file,
        rows = stats.rows_read,
        valid = stats.rows_valid,
        skipped = stats.skipped_total(),
        built = stats.documents_built,
        inserted = stats.writes.inserted,
        failed = stats.writes.failed,
        fallback_batches = stats.writes.fallback_batches,
        took = %format!("{:.1}s", report.load_time_seconds),
        rate = %format!("{:.1}/s", report.rows_per_second),
        "load finished"
    );
    for (reason, count) in &stats.skipped_rows {
        info!(target: "loader", reason = ?reason, count, "rows skipped");
    }
    for index in report.failed_indexes() {
        warn!(target: "loader", index = %index.name, error = ?index.error, "index missing");
    }
    match (&report.aggregates, &report.aggregation_error) {
        (Some(aggregates), _) => aggregates.log_summary(),
        (None, error) => warn!(target: "loader", error = ?error, "no aggregates collected"),
    }
}
