//! Document shapes written to the store.
//!
//! Field names match the collection layout consumers query against (`_id`,
//! `path_array`, `metadata.total_products`, `category.breadcrumbs`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalization::{Breadcrumb, NormalizedPath};

pub const CATEGORIES_COLLECTION: &str = "categories";
pub const PRODUCTS_COLLECTION: &str = "products";
pub const OFFERS_COLLECTION: &str = "offers";

/// Separator used when building composite document ids.
pub const ID_SEPARATOR: char = '_';

/// `"{left}_{right}"`, e.g. partner + category id.
pub fn composite_id(left: &str, right: &str) -> String {
    format!("{left}{ID_SEPARATOR}{right}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetadata {
    pub total_products: u64,
    pub last_updated: DateTime<Utc>,
}

/// One category per (partner, category id, normalized path) group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "_id")]
    pub id: String,
    pub partner: String,
    pub category_id: String,
    pub name: String,
    pub path: String,
    pub path_array: Vec<String>,
    pub level: usize,
    pub parent_path: Option<String>,
    pub metadata: CategoryMetadata,
}

impl Category {
    pub fn new(
        partner: &str,
        category_id: &str,
        path: &NormalizedPath,
        total_products: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: composite_id(partner, category_id),
            partner: partner.to_string(),
            category_id: category_id.to_string(),
            name: path.leaf().to_string(),
            path: path.as_str().to_string(),
            path_array: path.segments().to_vec(),
            level: path.depth(),
            parent_path: path.parent_path(),
            metadata: CategoryMetadata {
                total_products,
                last_updated: now,
            },
        }
    }
}

/// Denormalized category snapshot embedded in a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
    pub full_path: String,
    pub breadcrumbs: Vec<Breadcrumb>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub partner: String,
    pub offer_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: CategoryRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        partner: &str,
        offer_id: &str,
        name: &str,
        kind: &str,
        category_id: &str,
        path: &NormalizedPath,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: composite_id(partner, offer_id),
            partner: partner.to_string(),
            offer_id: offer_id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            category: CategoryRef {
                id: category_id.to_string(),
                name: path.leaf().to_string(),
                full_path: path.as_str().to_string(),
                breadcrumbs: path.breadcrumbs(),
            },
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferCategory {
    pub id: String,
    pub path: String,
    pub level: usize,
    pub parts: Vec<String>,
}

/// Flat offer snapshot keyed by the raw offer id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    #[serde(rename = "_id")]
    pub id: String,
    pub offer_id: String,
    pub name: String,
    pub offer_type: String,
    pub partner: String,
    pub category: OfferCategory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    pub fn new(
        partner: &str,
        offer_id: &str,
        name: &str,
        offer_type: &str,
        category_id: &str,
        path: &NormalizedPath,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: offer_id.to_string(),
            offer_id: offer_id.to_string(),
            name: name.to_string(),
            offer_type: offer_type.to_string(),
            partner: partner.to_string(),
            category: OfferCategory {
                id: category_id.to_string(),
                path: path.as_str().to_string(),
                level: path.depth(),
                parts: path.segments().to_vec(),
            },
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::normalize_str;
    use serde_json::{json, Value};

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-10-17T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn category_document_layout() {
        let path = normalize_str("Электроника\\Смартфоны").unwrap();
        let doc = serde_json::to_value(Category::new("OzonP", "55", &path, 3, fixed_now())).unwrap();
        assert_eq!(doc["_id"], json!("OzonP_55"));
        assert_eq!(doc["name"], json!("Смартфоны"));
        assert_eq!(doc["path"], json!("Электроника/Смартфоны"));
        assert_eq!(doc["path_array"], json!(["Электроника", "Смартфоны"]));
        assert_eq!(doc["level"], json!(2));
        assert_eq!(doc["parent_path"], json!("Электроника"));
        assert_eq!(doc["metadata"]["total_products"], json!(3));
    }

    #[test]
    fn root_category_serializes_null_parent() {
        let path = normalize_str("Книги").unwrap();
        let doc = serde_json::to_value(Category::new("OzonP", "1", &path, 1, fixed_now())).unwrap();
        assert_eq!(doc["parent_path"], Value::Null);
    }

    #[test]
    fn product_document_layout() {
        let path = normalize_str("Электроника\\Смартфоны").unwrap();
        let product = Product::new("OzonP", "9", "X", "Phone", "55", &path, fixed_now());
        let doc = serde_json::to_value(&product).unwrap();
        assert_eq!(doc["_id"], json!("OzonP_9"));
        assert_eq!(doc["type"], json!("Phone"));
        assert_eq!(
            doc["category"],
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
        let back: Product = serde_json::from_value(doc).unwrap();
        assert_eq!(back, product);
    }
}
