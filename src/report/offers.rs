use serde::Serialize;
use tracing::info;

use super::{log_shares, Share, TOP_N};
use crate::database_ops::store::{DocumentStore, FieldExpr, GroupQuery, GroupSort, StoreError};
use crate::models::OFFERS_COLLECTION;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferAggregates {
    pub total_offers: u64,
    pub top_categories: Vec<Share>,
    pub top_offer_types: Vec<Share>,
}

pub fn collect<S: DocumentStore + ?Sized>(store: &S) -> Result<OfferAggregates, StoreError> {
    let total = store.count(OFFERS_COLLECTION)?;
    let top = |field: &str| -> Result<Vec<Share>, StoreError> {
        let rows = store.group(
            OFFERS_COLLECTION,
            &GroupQuery::by(FieldExpr::path(field))
                .sorted(GroupSort::CountDescending)
                .limit(TOP_N),
        )?;
        Ok(Share::from_rows(rows, total))
    };
    Ok(OfferAggregates {
        total_offers: total,
        top_categories: top("category.path")?,
        top_offer_types: top("offer_type")?,
    })
}

impl OfferAggregates {
    pub fn log_summary(&self) {
        info!(target: "report", total = self.total_offers, "offers in store");
        log_shares("top categories", &self.top_categories);
        log_shares("top offer types", &self.top_offer_types);
    }
}
