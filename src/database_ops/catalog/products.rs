use chrono::{DateTime, Utc};

use super::row::CatalogRow;
use crate::database_ops::store::IndexSpec;
use crate::models::Product;

pub(crate) fn indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::ascending("idx_partner", "partner"),
        IndexSpec::unique("idx_offer_id", "offer_id"),
        IndexSpec::ascending("idx_type", "type"),
        IndexSpec::ascending("idx_category_id", "category.id"),
        IndexSpec::ascending("idx_category_path", "category.full_path"),
        IndexSpec::text("idx_name_text", "name"),
        IndexSpec::ascending("idx_created_at", "created_at"),
        IndexSpec::ascending("idx_updated_at", "updated_at"),
    ]
}

/// One product per validated row; `offer_id` must be present.
pub(crate) fn product_from_row(row: &CatalogRow, now: DateTime<Utc>) -> Option<Product> {
    let offer_id = row.offer_id.as_deref()?;
    Some(Product::new(
        &row.partner,
        offer_id,
        &row.name,
        &row.kind,
        &row.category_id,
        &row.path,
        now,
    ))
}
