use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::warn;

use super::row::CatalogRow;
use crate::database_ops::store::IndexSpec;
use crate::models::{composite_id, Category};
use crate::normalization::NormalizedPath;

pub(crate) fn indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::ascending("idx_partner", "partner"),
        IndexSpec::ascending("idx_category_id", "category_id"),
        IndexSpec::ascending("idx_path", "path"),
        IndexSpec::ascending("idx_level", "level"),
        IndexSpec::ascending("idx_parent_path", "parent_path"),
        IndexSpec::ascending("idx_total_products", "metadata.total_products"),
    ]
}

/// Row counts per (partner, category id, normalized path).
#[derive(Debug, Default)]
pub(crate) struct CategoryAggregator {
    groups: IndexMap<(String, String, String), (NormalizedPath, u64)>,
}

impl CategoryAggregator {
    pub fn add(&mut self, row: CatalogRow) {
        let key = (row.partner, row.category_id, row.path.as_str().to_string());
        self.groups.entry(key).or_insert((row.path, 0)).1 += 1;
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// One category per group keyed by `_id`, built in group-key order. Two groups sharing
    /// partner and category id under different paths collide on `_id`; the group whose
    /// normalized path sorts last wins, whatever order the rows arrived in.
    pub fn into_categories(mut self, now: DateTime<Utc>) -> IndexMap<String, Category> {
        self.groups.sort_keys();
        let mut out: IndexMap<String, Category> = IndexMap::with_capacity(self.groups.len());
        for ((partner, category_id, _), (path, total)) in self.groups {
            let id = composite_id(&partner, &category_id);
            if let Some(previous) = out.get(&id) {
                warn!(
                    target: "loader",
                    id = %id,
                    kept_path = %path,
                    dropped_path = %previous.path,
                    "category id collision; keeping the group whose path sorts last"
                );
            }
            out.insert(id, Category::new(&partner, &category_id, &path, total, now));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::normalize_str;

    fn row(partner: &str, category_id: &str, path: &str) -> CatalogRow {
        CatalogRow {
            partner: partner.into(),
            category_id: category_id.into(),
            path: normalize_str(path).unwrap(),
            offer_id: None,
            name: String::new(),
            kind: String::new(),
        }
    }

    #[test]
    fn separators_do_not_split_groups() {
        let mut agg = CategoryAggregator::default();
        agg.add(row("OzonP", "55", "Электроника\\Смартфоны"));
        agg.add(row("OzonP", "55", "Электроника/Смартфоны"));
        agg.add(row("OzonP", "55", " Электроника \\ Смартфоны "));
        agg.add(row("WB", "55", "Электроника\\Смартфоны"));
        assert_eq!(agg.group_count(), 2);

        let cats = agg.into_categories(Utc::now());
        assert_eq!(cats["OzonP_55"].metadata.total_products, 3);
        assert_eq!(cats["WB_55"].metadata.total_products, 1);
    }

    #[test]
    fn id_collision_keeps_greatest_path() {
        let mut agg = CategoryAggregator::default();
        agg.add(row("OzonP", "7", "A\\B"));
        agg.add(row("OzonP", "7", "A\\B"));
        agg.add(row("OzonP", "7", "C"));
        let cats = agg.into_categories(Utc::now());
        assert_eq!(cats.len(), 1);
        assert_eq!(cats["OzonP_7"].path, "C");
        assert_eq!(cats["OzonP_7"].metadata.total_products, 1);
    }

    #[test]
    fn id_collision_ignores_arrival_order() {
        let mut agg = CategoryAggregator::default();
        agg.add(row("P", "7", "Z\\Y"));
        agg.add(row("P", "7", "A"));
        agg.add(row("P", "7", "A"));
        let cats = agg.into_categories(Utc::now());
        assert_eq!(cats.len(), 1);
        assert_eq!(cats["P_7"].path, "Z/Y");
        assert_eq!(cats["P_7"].metadata.total_products, 1);
    }

    #[test]
    fn categories_come_out_in_key_order() {
        let mut agg = CategoryAggregator::default();
        agg.add(row("WB", "2", "B"));
        agg.add(row("OzonP", "9", "A"));
        agg.add(row("OzonP", "10", "C"));
        let ids: Vec<String> = agg.into_categories(Utc::now()).into_keys().collect();
        assert_eq!(ids, vec!["OzonP_10", "OzonP_9", "WB_2"]);
    }
}
