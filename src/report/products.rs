use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{log_shares, Share, TOP_N};
use crate::database_ops::store::{
    DocumentStore, FieldExpr, FindQuery, GroupQuery, GroupSort, StoreError,
};
use crate::models::PRODUCTS_COLLECTION;

/// Breadcrumb depth preferred for the example document.
pub const EXAMPLE_DEPTH: u64 = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductAggregates {
    pub total_products: u64,
    pub top_product_types: Vec<Share>,
    pub partner_distribution: Vec<Share>,
    pub category_level_distribution: Vec<Share>,
    /// A product with a four-level category, or any product when none has one.
    pub example_product: Option<Value>,
}

pub(crate) fn top_types<S: DocumentStore + ?Sized>(store: &S, total: u64) -> Result<Vec<Share>, StoreError> {
    let rows = store.group(
        PRODUCTS_COLLECTION,
        &GroupQuery::by(FieldExpr::path("type"))
            .sorted(GroupSort::CountDescending)
            .limit(TOP_N),
    )?;
    Ok(Share::from_rows(rows, total))
}

pub(crate) fn partner_distribution<S: DocumentStore + ?Sized>(
    store: &S,
    total: u64,
) -> Result<Vec<Share>, StoreError> {
    let rows = store.group(
        PRODUCTS_COLLECTION,
        &GroupQuery::by(FieldExpr::path("partner")).sorted(GroupSort::CountDescending),
    )?;
    Ok(Share::from_rows(rows, total))
}

pub fn collect<S: DocumentStore + ?Sized>(store: &S) -> Result<ProductAggregates, StoreError> {
    let total = store.count(PRODUCTS_COLLECTION)?;
    let depth_rows = store.group(
        PRODUCTS_COLLECTION,
        &GroupQuery::by(FieldExpr::array_len("category.breadcrumbs")).sorted(GroupSort::KeyAscending),
    )?;

    let mut example = store.find(
        PRODUCTS_COLLECTION,
        &FindQuery::all()
            .filter_eq(FieldExpr::array_len("category.breadcrumbs"), EXAMPLE_DEPTH)
            .limit(1),
    )?;
    if example.is_empty() {
        example = store.find(PRODUCTS_COLLECTION, &FindQuery::all().limit(1))?;
    }

    Ok(ProductAggregates {
        total_products: total,
        top_product_types: top_types(store, total)?,
        partner_distribution: partner_distribution(store, total)?,
        category_level_distribution: Share::from_rows(depth_rows, total),
        example_product: example.into_iter().next(),
    })
}

impl ProductAggregates {
    pub fn log_summary(&self) {
        info!(target: "report", total = self.total_products, "products in store");
        log_shares("top types", &self.top_product_types);
        log_shares("partners", &self.partner_distribution);
        log_shares("category depth", &self.category_level_distribution);
    }
}
