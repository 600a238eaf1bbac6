use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::TOP_N;
use crate::database_ops::store::{
    DocumentStore, FieldExpr, FindQuery, GroupQuery, GroupSort, SortOrder, StoreError,
};
use crate::models::CATEGORIES_COLLECTION;

/// Levels sampled into the category report.
pub const SAMPLE_LEVELS: [u64; 4] = [1, 3, 5, 8];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStat {
    pub level: Value,
    pub categories: u64,
    pub total_products: u64,
    pub avg_products: f64,
}

/// Condensed category view used for the top list and the level samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub id: Value,
    pub name: Value,
    pub level: Value,
    pub path: Value,
    pub parent_path: Value,
    pub total_products: Value,
}

impl CategorySummary {
    fn from_doc(doc: &Value) -> Self {
        let field = |path: &str| FieldExpr::path(path).eval(doc);
        Self {
            id: field("_id"),
            name: field("name"),
            level: field("level"),
            path: field("path"),
            parent_path: field("parent_path"),
            total_products: field("metadata.total_products"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAggregates {
    pub total_categories: u64,
    pub level_distribution: Vec<LevelStat>,
    pub top_categories: Vec<CategorySummary>,
    pub sample_categories: Vec<CategorySummary>,
}

/// Per-level counts with product sums and averages, ordered by level.
pub fn level_stats<S: DocumentStore + ?Sized>(store: &S) -> Result<Vec<LevelStat>, StoreError> {
    let rows = store.group(
        CATEGORIES_COLLECTION,
        &GroupQuery::by(FieldExpr::path("level"))
            .summing(FieldExpr::path("metadata.total_products"))
            .sorted(GroupSort::KeyAscending),
    )?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let sum = row.sum.unwrap_or(0.0);
            LevelStat {
                level: row.key,
                categories: row.count,
                total_products: sum.round() as u64,
                avg_products: if row.count > 0 { sum / row.count as f64 } else { 0.0 },
            }
        })
        .collect())
}

pub fn collect<S: DocumentStore + ?Sized>(store: &S) -> Result<CategoryAggregates, StoreError> {
    let total_categories = store.count(CATEGORIES_COLLECTION)?;
    let level_distribution = level_stats(store)?;

    let top_categories = store
        .find(
            CATEGORIES_COLLECTION,
            &FindQuery::all()
                .sort_by(FieldExpr::path("metadata.total_products"), SortOrder::Descending)
                .limit(TOP_N),
        )?
        .iter()
        .map(CategorySummary::from_doc)
        .collect();

    // largest category of each sampled level
    let mut sample_categories = Vec::new();
    for level in SAMPLE_LEVELS {
        let found = store.find(
            CATEGORIES_COLLECTION,
            &FindQuery::all()
                .filter_eq(FieldExpr::path("level"), level)
                .sort_by(FieldExpr::path("metadata.total_products"), SortOrder::Descending)
                .limit(1),
        )?;
        sample_categories.extend(found.iter().map(CategorySummary::from_doc));
    }

    Ok(CategoryAggregates {
        total_categories,
        level_distribution,
        top_categories,
        sample_categories,
    })
}

impl CategoryAggregates {
    pub fn log_summary(&self) {
        info!(target: "report", total = self.total_categories, "categories in store");
        for stat in &self.level_distribution {
            info!(
                target: "report",
                level = %stat.level,
                categories = stat.categories,
                products = stat.total_products,
                avg = %format!("{:.1}", stat.avg_products),
                "categories per level"
            );
        }
        for (rank, cat) in self.top_categories.iter().enumerate() {
            info!(
                target: "report",
                rank = rank + 1,
                name = %cat.name,
                level = %cat.level,
                products = %cat.total_products,
                path = %cat.path,
                "top category"
            );
        }
    }
}
