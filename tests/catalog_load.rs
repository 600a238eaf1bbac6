//! End-to-end loads against the in-memory and SQLite stores.

use std::collections::HashMap;

use catalog_loader::database_ops::catalog::{Aggregates, CatalogLoader, LoadMode, LoadStage, SkipReason};
use catalog_loader::database_ops::store::{
    Document, DocumentStore, FieldExpr, FindQuery, GroupQuery, GroupRow, IndexSpec, StoreError,
};
use catalog_loader::models::{CATEGORIES_COLLECTION, OFFERS_COLLECTION, PRODUCTS_COLLECTION};
use catalog_loader::source::{CsvSource, Row, VecSource};
use catalog_loader::{LoaderConfig, MemoryStore, SqliteStore};
use serde_json::{json, Value};

fn row(partner: &str, category_id: &str, path: Value, offer_id: &str, name: &str, kind: &str) -> Row {
    [
        ("Partner_Name", json!(partner)),
        ("Category_ID", json!(category_id)),
        ("Category_FullPathName", path),
        ("Offer_ID", json!(offer_id)),
        ("Offer_Name", json!(name)),
        ("Offer_Type", json!(kind)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn sample_rows() -> Vec<Row> {
    vec![
        row("OzonP", "55", json!("Электроника\\Смартфоны"), "9", "X", "Phone"),
        row("OzonP", "55", json!("Электроника/Смартфоны"), "10", "Y", "Phone"),
        row("OzonP", "60", json!("Дом\\Кухня\\Посуда\\Кастрюли"), "11", "Pot", "Cookware"),
        row("OzonP", "61", Value::Null, "12", "Lost", "Phone"),
        row("WB", "55", json!("Электроника\\Смартфоны"), "13", "Z", "Phone"),
        row("WB", "70", json!("   "), "14", "Blank", "Case"),
        row("WB", "71", json!("Книги"), "15", "Book", "Book"),
    ]
}

fn load(mode: LoadMode, rows: Vec<Row>) -> (catalog_loader::LoadReport, MemoryStore) {
    let mut loader = CatalogLoader::new(LoaderConfig::default(), MemoryStore::new());
    let report = loader.load(mode, &VecSource::new("snapshot", rows)).unwrap();
    (report, loader.into_store())
}

#[test]
fn ozonp_row_becomes_category_and_product() {
    let rows = vec![row("OzonP", "55", json!("Электроника\\Смартфоны"), "9", "X", "Phone")];

    let (_, store) = load(LoadMode::Categories, rows.clone());
    let cat = store.get(CATEGORIES_COLLECTION, "OzonP_55").unwrap();
    assert_eq!(cat["name"], json!("Смартфоны"));
    assert_eq!(cat["path"], json!("Электроника/Смартфоны"));
    assert_eq!(cat["path_array"], json!(["Электроника", "Смартфоны"]));
    assert_eq!(cat["level"], json!(2));
    assert_eq!(cat["parent_path"], json!("Электроника"));
    assert_eq!(cat["metadata"]["total_products"], json!(1));

    let (_, store) = load(LoadMode::Products, rows);
    let product = store.get(PRODUCTS_COLLECTION, "OzonP_9").unwrap();
    assert_eq!(
        product["category"],
        json!({
            "id": "55",
            "name": "Смартфоны",
            "full_path": "Электроника/Смартфоны",
            "breadcrumbs": [
                {"level": 1, "name": "Электроника"},
                {"level": 2, "name": "Смартфоны"}
            ]
        })
    );
    assert_eq!(product["type"], json!("Phone"));
    assert_eq!(product["created_at"], product["updated_at"]);
}

#[test]
fn invalid_paths_are_excluded_everywhere() {
    let (cats, cat_store) = load(LoadMode::Categories, sample_rows());
    let (products, product_store) = load(LoadMode::Products, sample_rows());

    for report in [&cats, &products] {
        assert_eq!(report.stats.rows_read, 7);
        assert_eq!(report.stats.rows_valid, 5);
        assert_eq!(report.stats.skipped_rows[&SkipReason::InvalidPath], 2);
    }
    assert!(cat_store.get(CATEGORIES_COLLECTION, "OzonP_61").is_none());
    assert!(cat_store.get(CATEGORIES_COLLECTION, "WB_70").is_none());
    assert_eq!(product_store.count(PRODUCTS_COLLECTION).unwrap(), 5);
    assert!(product_store.get(PRODUCTS_COLLECTION, "OzonP_12").is_none());
}

#[test]
fn category_totals_per_partner_match_valid_rows() {
    let (report, store) = load(LoadMode::Categories, sample_rows());
    assert_eq!(report.stats.writes.inserted, 4);

    let sums: HashMap<String, f64> = store
        .group(
            CATEGORIES_COLLECTION,
            &GroupQuery::by(FieldExpr::path("partner")).summing(FieldExpr::path("metadata.total_products")),
        )
        .unwrap()
        .into_iter()
        .map(|GroupRow { key, sum, .. }| (key.as_str().unwrap().to_string(), sum.unwrap()))
        .collect();
    assert_eq!(sums["OzonP"], 3.0);
    assert_eq!(sums["WB"], 2.0);
    assert_eq!(
        store.get(CATEGORIES_COLLECTION, "OzonP_55").unwrap()["metadata"]["total_products"],
        json!(2)
    );
}

#[test]
fn reloading_yields_identical_categories() {
    let source = VecSource::new("snapshot", sample_rows());
    let mut loader = CatalogLoader::new(LoaderConfig::default(), SqliteStore::open_in_memory().unwrap());

    let snapshot = |store: &SqliteStore| -> Vec<Value> {
        store
            .find(
                CATEGORIES_COLLECTION,
                &FindQuery::all().sort_by(FieldExpr::path("_id"), catalog_loader::database_ops::store::SortOrder::Ascending),
            )
            .unwrap()
            .into_iter()
            .map(|mut doc| {
                doc["metadata"]["last_updated"] = Value::Null;
                doc
            })
            .collect()
    };

    loader.load(LoadMode::Categories, &source).unwrap();
    let first = snapshot(loader.store());
    loader.load(LoadMode::Categories, &source).unwrap();
    let second = snapshot(loader.store());
    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
}

#[test]
fn duplicate_in_batch_fails_alone() {
    // five rows, the fourth repeats the first partner/offer pair
    let rows = vec![
        row("OzonP", "55", json!("A\\B"), "1", "a", "Phone"),
        row("OzonP", "55", json!("A\\B"), "2", "b", "Phone"),
        row("OzonP", "55", json!("A\\B"), "3", "c", "Phone"),
        row("OzonP", "55", json!("A\\B"), "1", "dup", "Phone"),
        row("OzonP", "55", json!("A\\B"), "5", "e", "Case"),
    ];
    let mut loader = CatalogLoader::new(LoaderConfig::default(), MemoryStore::new());
    let report = loader
        .load(LoadMode::Products, &VecSource::new("snapshot", rows))
        .unwrap();
    assert_eq!(loader.stage(), LoadStage::Done);
    let writes = &report.stats.writes;
    assert_eq!(writes.batches, 1);
    assert_eq!(writes.inserted, 4);
    assert_eq!(writes.failed, 1);
    assert_eq!(writes.failure_samples[0].id, "OzonP_1");
    assert_eq!(report.stats.documents_built, 5);

    // aggregates describe what was persisted, not what was built
    let Some(Aggregates::Products(aggregates)) = &report.aggregates else {
        panic!("expected product aggregates");
    };
    assert_eq!(aggregates.total_products, 4);
    let store = loader.into_store();
    assert_eq!(store.get(PRODUCTS_COLLECTION, "OzonP_1").unwrap()["name"], json!("a"));
}

#[test]
fn unique_index_failure_is_recorded_not_fatal() {
    // same offer id under two partners: distinct product ids, duplicate offer_id
    let rows = vec![
        row("OzonP", "55", json!("A"), "7", "a", "Phone"),
        row("WB", "55", json!("A"), "7", "b", "Phone"),
    ];
    let (report, store) = load(LoadMode::Products, rows);
    assert_eq!(report.stats.writes.inserted, 2);
    let failed: Vec<_> = report.failed_indexes().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "idx_offer_id");
    assert!(failed[0].error.is_some());
    assert_eq!(report.indexes.len(), 8);
    assert_eq!(store.indexes(PRODUCTS_COLLECTION).len(), 7);
}

#[test]
fn sqlite_unique_index_failure_still_reaches_done() {
    let rows = vec![
        row("OzonP", "55", json!("A\\B"), "7", "a", "Phone"),
        row("WB", "56", json!("A\\C"), "7", "b", "Phone"),
        row("WB", "56", json!("A\\C"), "8", "c", "Case"),
    ];
    let mut loader = CatalogLoader::new(LoaderConfig::default(), SqliteStore::open_in_memory().unwrap());
    let report = loader
        .load(LoadMode::Products, &VecSource::new("snapshot", rows))
        .unwrap();
    assert_eq!(loader.stage(), LoadStage::Done);
    assert_eq!(report.stats.writes.inserted, 3);

    let failed: Vec<_> = report.failed_indexes().map(|i| i.name.as_str()).collect();
    assert_eq!(failed, vec!["idx_offer_id"]);
    assert_eq!(report.indexes.iter().filter(|i| i.created).count(), 7);
    let names = loader.store().index_names(PRODUCTS_COLLECTION).unwrap();
    assert!(names.contains(&"products__idx_partner".to_string()));
    assert!(!names.contains(&"products__idx_offer_id".to_string()));

    let Some(Aggregates::Products(aggregates)) = &report.aggregates else {
        panic!("expected product aggregates");
    };
    assert_eq!(aggregates.total_products, 3);
    assert!(report.aggregation_error.is_none());
}

#[test]
fn offers_are_keyed_by_raw_offer_id() {
    let (report, store) = load(LoadMode::Offers, sample_rows());
    assert_eq!(report.stats.writes.inserted, 5);
    let offer = store.get(OFFERS_COLLECTION, "11").unwrap();
    assert_eq!(offer["category"]["path"], json!("Дом/Кухня/Посуда/Кастрюли"));
    assert_eq!(offer["category"]["level"], json!(4));
    assert_eq!(offer["offer_type"], json!("Cookware"));

    let Some(Aggregates::Offers(aggregates)) = &report.aggregates else {
        panic!("expected offer aggregates");
    };
    assert_eq!(aggregates.top_categories[0].key, json!("Электроника/Смартфоны"));
    assert_eq!(aggregates.top_categories[0].count, 3);
    assert_eq!(aggregates.top_offer_types[0].key, json!("Phone"));
}

#[test]
fn missing_source_aborts_while_connecting() {
    let mut loader = CatalogLoader::new(LoaderConfig::default(), MemoryStore::new());
    let err = loader
        .load(LoadMode::Products, &CsvSource::new("/no/such/snapshot.csv"))
        .unwrap_err();
    assert!(format!("{err:#}").contains("not found"));
    assert_eq!(loader.stage(), LoadStage::Connecting);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flake {
    /// Every bulk insert fails with a non-fatal error.
    RejectBatches,
    /// Every bulk insert fails as unreachable.
    Unreachable,
    /// Writes work; grouping queries fail with a non-fatal error.
    BrokenQueries,
}

/// Memory store wrapper that fails in one configured way.
struct FlakyStore {
    inner: MemoryStore,
    flake: Flake,
    bulk_calls: usize,
}

impl FlakyStore {
    fn new(flake: Flake) -> Self {
        Self {
            inner: MemoryStore::new(),
            flake,
            bulk_calls: 0,
        }
    }
}

fn malformed_json() -> StoreError {
    serde_json::from_str::<Value>("{").unwrap_err().into()
}

impl DocumentStore for FlakyStore {
    fn describe(&self) -> String {
        "flaky".to_string()
    }
    fn ping(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
    fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        self.inner.drop_collection(collection)
    }
    fn create_index(&mut self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.inner.create_index(collection, index)
    }
    fn insert_many(&mut self, collection: &str, docs: &[Document]) -> Result<usize, StoreError> {
        self.bulk_calls += 1;
        match self.flake {
            Flake::Unreachable => Err(StoreError::Unavailable {
                target: "flaky".to_string(),
                reason: "connection reset".to_string(),
            }),
            Flake::RejectBatches => Err(malformed_json()),
            Flake::BrokenQueries => self.inner.insert_many(collection, docs),
        }
    }
    fn insert_one(&mut self, collection: &str, doc: &Document) -> Result<(), StoreError> {
        self.inner.insert_one(collection, doc)
    }
    fn count(&self, collection: &str) -> Result<u64, StoreError> {
        self.inner.count(collection)
    }
    fn count_distinct(&self, collection: &str, expr: &FieldExpr) -> Result<u64, StoreError> {
        self.inner.count_distinct(collection, expr)
    }
    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        self.inner.find(collection, query)
    }
    fn group(&self, collection: &str, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError> {
        if self.flake == Flake::BrokenQueries {
            return Err(malformed_json());
        }
        self.inner.group(collection, query)
    }
}

#[test]
fn rejected_batch_falls_back_to_single_inserts() {
    let config = LoaderConfig {
        category_batch_size: 2,
        ..LoaderConfig::default()
    };
    let mut loader = CatalogLoader::new(config, FlakyStore::new(Flake::RejectBatches));
    let report = loader
        .load(LoadMode::Categories, &VecSource::new("snapshot", sample_rows()))
        .unwrap();
    assert_eq!(report.stats.writes.batches, 2);
    assert_eq!(report.stats.writes.fallback_batches, 2);
    assert_eq!(report.stats.writes.inserted, 4);
    assert_eq!(report.stats.writes.failed, 0);
    assert_eq!(loader.store().bulk_calls, 2);
    assert_eq!(loader.store().count(CATEGORIES_COLLECTION).unwrap(), 4);
}

#[test]
fn unreachable_store_during_write_is_fatal() {
    let mut loader = CatalogLoader::new(LoaderConfig::default(), FlakyStore::new(Flake::Unreachable));
    let err = loader
        .load(LoadMode::Products, &VecSource::new("snapshot", sample_rows()))
        .unwrap_err();
    assert!(format!("{err:#}").contains("unavailable"));
    assert_eq!(loader.stage(), LoadStage::Writing);
}

#[test]
fn failed_aggregation_is_recorded_and_load_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoaderConfig {
        report_dir: Some(dir.path().to_path_buf()),
        ..LoaderConfig::default()
    };
    let mut loader = CatalogLoader::new(config, FlakyStore::new(Flake::BrokenQueries));
    let report = loader
        .load(LoadMode::Offers, &VecSource::new("snapshot", sample_rows()))
        .unwrap();
    assert_eq!(loader.stage(), LoadStage::Done);
    assert_eq!(report.stats.writes.inserted, 5);
    assert!(report.aggregates.is_none());
    assert!(report.aggregation_error.is_some());
    let aggregating = report
        .stage_timings
        .iter()
        .find(|t| t.stage == "aggregating")
        .unwrap();
    assert!(!aggregating.success);

    let written: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("offers_report.json")).unwrap(),
    )
    .unwrap();
    assert!(written.get("aggregates").is_none());
    assert!(written["aggregation_error"].is_string());
}

#[test]
fn csv_to_sqlite_load_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("offers.csv");
    std::fs::write(
        &csv_path,
        "Partner_Name,Category_ID,Category_FullPathName,Offer_ID,Offer_Name,Offer_Type\n\
         OzonP,55,Электроника\\Смартфоны,9,Смартфон X,Phone\n\
         OzonP,60,Дом\\Кухня\\Посуда\\Кастрюли,11,Кастрюля,Cookware\n\
         WB,55,,12,Nothing,Phone\n",
    )
    .unwrap();
    let config = LoaderConfig {
        report_dir: Some(dir.path().join("reports")),
        ..LoaderConfig::default()
    };
    let store = SqliteStore::open(dir.path().join("catalog.sqlite3")).unwrap();
    let mut loader = CatalogLoader::new(config, store);
    let source = CsvSource::new(&csv_path);
    loader.load(LoadMode::Categories, &source).unwrap();
    let report = loader.load(LoadMode::Products, &source).unwrap();
    assert_eq!(report.stats.writes.inserted, 2);
    assert!(report.failed_indexes().next().is_none());

    let Some(Aggregates::Products(aggregates)) = &report.aggregates else {
        panic!("expected product aggregates");
    };
    let example = aggregates.example_product.as_ref().unwrap();
    assert_eq!(example["_id"], json!("OzonP_11"));
    assert_eq!(aggregates.category_level_distribution.len(), 2);

    let written: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("reports/products_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written["stats"]["rows_read"], json!(3));
    assert_eq!(written["stats"]["skipped_rows"]["invalid_path"], json!(1));
    assert_eq!(written["aggregates"]["total_products"], json!(2));

    let hits = loader.store().search_text(PRODUCTS_COLLECTION, "name", "Кастрюля", 5).unwrap();
    assert_eq!(hits.len(), 1);

    let stats = catalog_loader::report::stats::collect(loader.store()).unwrap();
    assert_eq!(stats.total_products, 2);
    assert_eq!(stats.distinct_category_ids, 2);
    assert!((stats.avg_category_depth - 3.0).abs() < 1e-9);
    assert!(stats.structure.unwrap().is_complete());
    assert_eq!(stats.total_categories, 2);
}
