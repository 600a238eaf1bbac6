use serde::Serialize;
use serde_json::Value;

use crate::config::ColumnNames;
use crate::normalization::{normalize, NormalizedPath};
use crate::source::Row;

/// Why a source row was left out of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidPath,
    MissingPartner,
    MissingCategoryId,
    MissingOfferId,
    /// The reader could not decode the row at all.
    MalformedRow,
}

/// The fields every mode pulls out of a row, validated.
#[derive(Debug, Clone)]
pub(crate) struct CatalogRow {
    pub partner: String,
    pub category_id: String,
    pub path: NormalizedPath,
    pub offer_id: Option<String>,
    pub name: String,
    pub kind: String,
}

impl CatalogRow {
    /// Validate a row. `need_offer_id` is false for category grouping, which only counts
    /// rows.
    pub fn parse(row: &Row, columns: &ColumnNames, need_offer_id: bool) -> Result<Self, SkipReason> {
        let path = normalize(row.get(&columns.category_path)).map_err(|_| SkipReason::InvalidPath)?;
        let partner = cell_text(row, &columns.partner).ok_or(SkipReason::MissingPartner)?;
        let category_id = cell_text(row, &columns.category_id).ok_or(SkipReason::MissingCategoryId)?;
        let offer_id = cell_text(row, &columns.offer_id);
        if need_offer_id && offer_id.is_none() {
            return Err(SkipReason::MissingOfferId);
        }
        Ok(Self {
            partner,
            category_id,
            path,
            offer_id,
            name: cell_text(row, &columns.offer_name).unwrap_or_default(),
            kind: cell_text(row, &columns.offer_type).unwrap_or_default(),
        })
    }
}

/// String rendering of a cell; `None` for null or blank values. Integral floats render
/// without a fraction so `55.0` and `"55"` produce the same key.
pub(crate) fn cell_text(row: &Row, column: &str) -> Option<String> {
    let text = match row.get(column)? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}
