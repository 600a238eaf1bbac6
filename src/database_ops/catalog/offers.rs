use chrono::{DateTime, Utc};

use super::row::CatalogRow;
use crate::database_ops::store::IndexSpec;
use crate::models::Offer;

pub(crate) fn indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::unique("offer_id_1", "offer_id"),
        IndexSpec::ascending("category_id_1", "category.id"),
        IndexSpec::ascending("category_path_1", "category.path"),
        IndexSpec::ascending("partner_1", "partner"),
        IndexSpec::ascending("offer_type_1", "offer_type"),
        IndexSpec::text("name_text", "name"),
    ]
}

pub(crate) fn offer_from_row(row: &CatalogRow, now: DateTime<Utc>) -> Option<Offer> {
    let offer_id = row.offer_id.as_deref()?;
    Some(Offer::new(
        &row.partner,
        offer_id,
        &row.name,
        &row.kind,
        &row.category_id,
        &row.path,
        now,
    ))
}
