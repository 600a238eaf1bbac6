//! Read-only statistics over an already loaded store.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::categories::{level_stats, LevelStat};
use super::products::{partner_distribution, top_types};
use super::Share;
use crate::database_ops::store::{
    lookup, DocumentStore, FieldExpr, FindQuery, GroupQuery, StoreError,
};
use crate::models::{CATEGORIES_COLLECTION, PRODUCTS_COLLECTION};

const PRODUCT_FIELDS: [&str; 8] = [
    "_id",
    "partner",
    "offer_id",
    "name",
    "type",
    "category",
    "created_at",
    "updated_at",
];
const CATEGORY_REF_FIELDS: [&str; 4] = ["id", "name", "full_path", "breadcrumbs"];

/// Which expected fields a sample product carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureCheck {
    pub sample_id: Value,
    pub missing_fields: Vec<String>,
}

impl StructureCheck {
    pub fn check(doc: &Value) -> Self {
        let mut missing: Vec<String> = PRODUCT_FIELDS
            .iter()
            .filter(|f| doc.get(**f).is_none())
            .map(|f| f.to_string())
            .collect();
        missing.extend(
            CATEGORY_REF_FIELDS
                .iter()
                .map(|f| format!("category.{f}"))
                .filter(|path| lookup(doc, path).is_none()),
        );
        Self {
            sample_id: doc.get("_id").cloned().unwrap_or(Value::Null),
            missing_fields: missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub total_products: u64,
    pub distinct_types: u64,
    pub distinct_category_ids: u64,
    /// Mean breadcrumb count over all products.
    pub avg_category_depth: f64,
    pub top_product_types: Vec<Share>,
    pub partner_distribution: Vec<Share>,
    pub structure: Option<StructureCheck>,
    pub total_categories: u64,
    /// Empty when the `categories` collection is absent.
    pub categories_per_level: Vec<LevelStat>,
}

pub fn collect<S: DocumentStore + ?Sized>(store: &S) -> Result<StatsReport, StoreError> {
    let total = store.count(PRODUCTS_COLLECTION)?;
    let depth = FieldExpr::array_len("category.breadcrumbs");
    let (depth_sum, depth_count) = store
        .group(PRODUCTS_COLLECTION, &GroupQuery::by(depth))?
        .iter()
        .filter_map(|row| row.key.as_f64().map(|d| (d * row.count as f64, row.count)))
        .fold((0.0, 0u64), |(s, c), (ds, dc)| (s + ds, c + dc));
    let sample = store.find(PRODUCTS_COLLECTION, &FindQuery::all().limit(1))?;

    Ok(StatsReport {
        total_products: total,
        distinct_types: store.count_distinct(PRODUCTS_COLLECTION, &FieldExpr::path("type"))?,
        distinct_category_ids: store
            .count_distinct(PRODUCTS_COLLECTION, &FieldExpr::path("category.id"))?,
        avg_category_depth: if depth_count > 0 { depth_sum / depth_count as f64 } else { 0.0 },
        top_product_types: top_types(store, total)?,
        partner_distribution: partner_distribution(store, total)?,
        structure: sample.first().map(StructureCheck::check),
        total_categories: store.count(CATEGORIES_COLLECTION)?,
        categories_per_level: level_stats(store)?,
    })
}

impl StatsReport {
    pub fn log_summary(&self) {
        info!(
            target: "report",
            products = self.total_products,
            distinct_types = self.distinct_types,
            distinct_category_ids = self.distinct_category_ids,
            avg_depth = %format!("{:.2}", self.avg_category_depth),
            categories = self.total_categories,
            "store statistics"
        );
        super::log_shares("top types", &self.top_product_types);
        super::log_shares("partners", &self.partner_distribution);
        match &self.structure {
            Some(check) if check.is_complete() => {
                info!(target: "report", sample = %check.sample_id, "sample product structure ok");
            }
            Some(check) => {
                warn!(
                    target: "report",
                    sample = %check.sample_id,
                    missing = ?check.missing_fields,
                    "sample product is missing fields"
                );
            }
            None => info!(target: "report", "no products to inspect"),
        }
    }
}
